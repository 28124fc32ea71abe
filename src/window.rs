//! Overlay window state: visibility, size, pin and click-through.

use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::events::{self, EventSink};

pub const OVERLAY_LABEL: &str = "overlay";
pub const OVERLAY_WIDTH: f64 = 380.0;
pub const OVERLAY_HEIGHT: f64 = 650.0;
pub const OVERLAY_X: f64 = 20.0;
pub const OVERLAY_Y: f64 = 100.0;

/// How often the host checks whether the cursor is over the overlay.
pub const POINTER_POLL: Duration = Duration::from_millis(100);

/// OS window operations the overlay needs. Implemented over the Tauri
/// webview window on desktop.
pub trait OverlayWindow: Send + Sync {
    fn show(&self) -> Result<()>;
    fn hide(&self) -> Result<()>;
    fn is_visible(&self) -> Result<bool>;
    fn set_focus(&self) -> Result<()>;
    fn set_size(&self, width: f64, height: f64) -> Result<()>;
    fn set_ignore_mouse(&self, ignore: bool) -> Result<()>;
    fn set_always_on_top(&self, on_top: bool) -> Result<()>;
    fn set_content_protected(&self, protected: bool) -> Result<()>;
    fn opacity(&self) -> f64;
    fn set_opacity(&self, opacity: f64) -> Result<()>;
    /// Whether the OS cursor is over the window. A click-through window
    /// receives no pointer events, so hover is read from here.
    fn cursor_inside(&self) -> Result<bool>;
}

/// Hit test of `cursor` against the rectangle at `origin` with `size`.
pub fn contains(origin: (f64, f64), size: (f64, f64), cursor: (f64, f64)) -> bool {
    let (x, y) = cursor;
    x >= origin.0 && x < origin.0 + size.0 && y >= origin.1 && y < origin.1 + size.1
}

/// `setIgnoreMouse` options as the UI sends them.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct IgnoreMouseOptions {
    #[serde(default)]
    pub forward: bool,
}

/// Pointer activity reported by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PointerEvent {
    Enter,
    Leave,
    DragStart,
    DragEnd,
}

#[derive(Debug, Clone, Copy)]
struct PointerState {
    ignoring: bool,
    dragging: bool,
    hovering: bool,
    tracking: bool,
}

pub struct WindowController {
    window: Arc<dyn OverlayWindow>,
    events: Arc<dyn EventSink>,
    pointer: Mutex<PointerState>,
}

impl WindowController {
    /// Applies the initial flags: content protection and click-through on,
    /// with hover tracking so the pointer can take the window back.
    pub fn new(window: Arc<dyn OverlayWindow>, events: Arc<dyn EventSink>) -> Result<Self> {
        window.set_content_protected(true)?;
        window.set_always_on_top(true)?;
        window.set_ignore_mouse(true)?;
        Ok(Self {
            window,
            events,
            pointer: Mutex::new(PointerState {
                ignoring: true,
                dragging: false,
                hovering: false,
                tracking: true,
            }),
        })
    }

    pub fn window(&self) -> Arc<dyn OverlayWindow> {
        Arc::clone(&self.window)
    }

    /// Hotkey handler. Returns the new visibility. A shown window takes
    /// input until the pointer leaves it.
    pub fn toggle_visibility(&self) -> Result<bool> {
        if self.window.is_visible()? {
            self.window.hide()?;
            return Ok(false);
        }
        self.window.show()?;
        self.window.set_focus()?;
        self.set_ignore_mouse(false)?;
        events::emit(&*self.events, events::APP_WOKE_UP, &());
        Ok(true)
    }

    pub fn resize(&self, width: f64, height: f64) -> Result<()> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(width) || !valid(height) {
            return Err(AppError::Window(format!(
                "Invalid window size {}x{}",
                width, height
            )));
        }
        self.window.set_size(width, height)
    }

    pub fn set_ignore_mouse(&self, ignore: bool) -> Result<()> {
        let mut pointer = self.pointer.lock();
        if pointer.ignoring != ignore {
            self.window.set_ignore_mouse(ignore)?;
            pointer.ignoring = ignore;
        }
        Ok(())
    }

    /// Click-through follows the pointer: off while hovering or dragging,
    /// back on when the pointer leaves outside a drag.
    pub fn pointer(&self, event: PointerEvent) -> Result<()> {
        let ignore = {
            let mut pointer = self.pointer.lock();
            match event {
                PointerEvent::Enter => Some(false),
                PointerEvent::Leave => (!pointer.dragging).then_some(true),
                PointerEvent::DragStart => {
                    pointer.dragging = true;
                    Some(false)
                }
                PointerEvent::DragEnd => {
                    pointer.dragging = false;
                    None
                }
            }
        };
        match ignore {
            Some(ignore) => self.set_ignore_mouse(ignore),
            None => Ok(()),
        }
    }

    /// Click-through as requested by the UI. With `forward` the host keeps
    /// tracking hover while the window ignores the mouse; without it the
    /// window stays click-through until told otherwise.
    pub fn set_click_through(&self, ignore: bool, options: IgnoreMouseOptions) -> Result<()> {
        self.pointer.lock().tracking = !ignore || options.forward;
        self.set_ignore_mouse(ignore)
    }

    /// One hover check. Turns a change in cursor position into an
    /// enter or leave.
    pub fn track_pointer(&self) -> Result<()> {
        if !self.pointer.lock().tracking {
            return Ok(());
        }
        let inside = self.window.cursor_inside()?;
        let changed = {
            let mut pointer = self.pointer.lock();
            let changed = pointer.hovering != inside;
            pointer.hovering = inside;
            changed
        };
        match (changed, inside) {
            (false, _) => Ok(()),
            (true, true) => self.pointer(PointerEvent::Enter),
            (true, false) => self.pointer(PointerEvent::Leave),
        }
    }

    pub fn is_ignoring_mouse(&self) -> bool {
        self.pointer.lock().ignoring
    }

    pub fn toggle_always_on_top(&self, on_top: bool) -> Result<()> {
        self.window.set_always_on_top(on_top)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeWindow;
    use super::*;
    use crate::events::testing::RecordingSink;

    fn controller() -> (WindowController, Arc<FakeWindow>, Arc<RecordingSink>) {
        let window = Arc::new(FakeWindow::with_opacity(1.0));
        let sink = Arc::new(RecordingSink::default());
        let ctl = WindowController::new(window.clone(), sink.clone()).unwrap();
        (ctl, window, sink)
    }

    #[test]
    fn test_new_window_is_protected_and_click_through() {
        let (ctl, window, _) = controller();
        assert!(*window.protected.lock());
        assert_eq!(*window.on_top.lock(), Some(true));
        assert_eq!(*window.ignore_mouse.lock(), Some(true));
        assert!(ctl.is_ignoring_mouse());
    }

    #[test]
    fn test_toggle_visibility_wakes_ui_on_show() {
        let (ctl, window, sink) = controller();

        assert!(ctl.toggle_visibility().unwrap());
        assert!(*window.visible.lock());
        assert!(window.calls.lock().contains(&"focus".to_string()));
        assert_eq!(sink.named(events::APP_WOKE_UP).len(), 1);

        assert!(!ctl.toggle_visibility().unwrap());
        assert!(!*window.visible.lock());
        assert_eq!(sink.named(events::APP_WOKE_UP).len(), 1);
    }

    #[test]
    fn test_resize_rejects_bad_sizes() {
        let (ctl, window, _) = controller();
        assert!(ctl.resize(0.0, 650.0).is_err());
        assert!(ctl.resize(380.0, f64::NAN).is_err());
        assert!(window.size.lock().is_none());

        ctl.resize(400.0, 700.0).unwrap();
        assert_eq!(*window.size.lock(), Some((400.0, 700.0)));
    }

    #[test]
    fn test_leave_during_drag_keeps_window_interactive() {
        let (ctl, _, _) = controller();

        ctl.pointer(PointerEvent::Enter).unwrap();
        assert!(!ctl.is_ignoring_mouse());

        ctl.pointer(PointerEvent::DragStart).unwrap();
        ctl.pointer(PointerEvent::Leave).unwrap();
        assert!(!ctl.is_ignoring_mouse());

        ctl.pointer(PointerEvent::DragEnd).unwrap();
        assert!(!ctl.is_ignoring_mouse());

        ctl.pointer(PointerEvent::Leave).unwrap();
        assert!(ctl.is_ignoring_mouse());
    }

    #[test]
    fn test_unchanged_click_through_skips_os_call() {
        let (ctl, window, _) = controller();
        let before = window.calls.lock().len();
        ctl.set_ignore_mouse(true).unwrap();
        assert_eq!(window.calls.lock().len(), before);
    }

    #[test]
    fn test_cursor_over_click_through_window_takes_it_back() {
        let (ctl, window, _) = controller();
        ctl.track_pointer().unwrap();
        assert!(ctl.is_ignoring_mouse());

        *window.cursor_inside.lock() = true;
        ctl.track_pointer().unwrap();
        assert!(!ctl.is_ignoring_mouse());
        assert_eq!(*window.ignore_mouse.lock(), Some(false));

        *window.cursor_inside.lock() = false;
        ctl.track_pointer().unwrap();
        assert!(ctl.is_ignoring_mouse());
    }

    #[test]
    fn test_click_through_without_forward_stops_tracking() {
        let (ctl, window, _) = controller();
        ctl.set_click_through(true, IgnoreMouseOptions { forward: false }).unwrap();

        *window.cursor_inside.lock() = true;
        ctl.track_pointer().unwrap();
        assert!(ctl.is_ignoring_mouse());

        ctl.set_click_through(true, IgnoreMouseOptions { forward: true }).unwrap();
        ctl.track_pointer().unwrap();
        assert!(!ctl.is_ignoring_mouse());

        let opts: IgnoreMouseOptions = serde_json::from_str(r#"{"forward":true}"#).unwrap();
        assert!(opts.forward);
    }

    #[test]
    fn test_hotkey_show_makes_window_interactive() {
        let (ctl, window, _) = controller();
        assert!(ctl.is_ignoring_mouse());

        ctl.toggle_visibility().unwrap();
        assert!(!ctl.is_ignoring_mouse());
        assert_eq!(*window.ignore_mouse.lock(), Some(false));
    }

    #[test]
    fn test_contains_is_half_open() {
        assert!(contains((20.0, 100.0), (380.0, 650.0), (20.0, 100.0)));
        assert!(contains((20.0, 100.0), (380.0, 650.0), (399.5, 749.0)));
        assert!(!contains((20.0, 100.0), (380.0, 650.0), (400.0, 300.0)));
        assert!(!contains((20.0, 100.0), (380.0, 650.0), (10.0, 300.0)));
    }

    #[test]
    fn test_pointer_event_wire_names() {
        let e: PointerEvent = serde_json::from_str("\"drag-start\"").unwrap();
        assert_eq!(e, PointerEvent::DragStart);
    }
}
