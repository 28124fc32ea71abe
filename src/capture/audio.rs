use std::io::Cursor;
use std::sync::Arc;

use crate::error::{AppError, Result};

/// A live microphone capture. Samples are mono `f32` in `[-1, 1]`.
///
/// Stopping releases the device; dropping the last handle stops it too.
pub trait MicrophoneStream: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Drains everything recorded since the previous call.
    fn take_samples(&self) -> Vec<f32>;

    fn stop(&self);
}

/// Loudness analysis over recorded samples.
pub trait AudioLevelMeter: Send + Sync {
    fn level(&self, samples: &[f32]) -> f32;

    fn close(&self);
}

/// Acquires audio resources. Desktop builds use the default input device
/// through cpal; tests count acquisitions and releases.
pub trait MediaDevices: Send + Sync {
    fn open_microphone(&self) -> Result<Arc<dyn MicrophoneStream>>;

    fn open_level_meter(&self) -> Result<Arc<dyn AudioLevelMeter>>;
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Root-mean-square meter. Holds no device, so closing is a no-op.
pub struct RmsMeter;

impl AudioLevelMeter for RmsMeter {
    fn level(&self, samples: &[f32]) -> f32 {
        rms(samples)
    }

    fn close(&self) {}
}

/// 16-bit mono PCM WAV bytes for the transcription endpoint.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::new(&mut cursor, spec)
        .map_err(|e| AppError::Audio(format!("WAV error: {}", e)))?;

    for &sample in samples {
        let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer
            .write_sample(s)
            .map_err(|e| AppError::Audio(format!("WAV write error: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| AppError::Audio(format!("WAV finalize error: {}", e)))?;

    Ok(cursor.into_inner())
}

#[cfg(feature = "desktop")]
pub use self::cpal_backend::CpalDevices;

#[cfg(feature = "desktop")]
mod cpal_backend {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use parking_lot::Mutex;
    use std::sync::Arc;

    use super::{AudioLevelMeter, MediaDevices, MicrophoneStream, RmsMeter};
    use crate::error::{AppError, Result};

    /// cpal::Stream is not Send on every platform; it is only touched behind
    /// the owning mutex.
    struct SendStream(cpal::Stream);
    unsafe impl Send for SendStream {}
    unsafe impl Sync for SendStream {}

    pub struct CpalDevices;

    struct CpalMicrophone {
        stream: Mutex<Option<SendStream>>,
        buffer: Arc<Mutex<Vec<f32>>>,
        sample_rate: u32,
    }

    impl MicrophoneStream for CpalMicrophone {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn take_samples(&self) -> Vec<f32> {
            std::mem::take(&mut *self.buffer.lock())
        }

        fn stop(&self) {
            if self.stream.lock().take().is_some() {
                log::info!("Microphone released");
            }
        }
    }

    impl Drop for CpalMicrophone {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn push_mono(buffer: &Mutex<Vec<f32>>, data: impl Iterator<Item = f32>, channels: usize) {
        let data: Vec<f32> = data.collect();
        let mut buffer = buffer.lock();
        if channels <= 1 {
            buffer.extend_from_slice(&data);
            return;
        }
        buffer.extend(
            data.chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
        );
    }

    impl MediaDevices for CpalDevices {
        fn open_microphone(&self) -> Result<Arc<dyn MicrophoneStream>> {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| AppError::Audio("No input device available".to_string()))?;

            let config = device
                .default_input_config()
                .map_err(|e| AppError::Audio(format!("Failed to get input config: {}", e)))?;

            let sample_rate = config.sample_rate().0;
            let channels = config.channels() as usize;
            let buffer = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&buffer);
            let on_error = |err| log::error!("Audio stream error: {}", err);

            let stream = match config.sample_format() {
                cpal::SampleFormat::F32 => device.build_input_stream(
                    &config.into(),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        push_mono(&sink, data.iter().copied(), channels)
                    },
                    on_error,
                    None,
                ),
                cpal::SampleFormat::I16 => device.build_input_stream(
                    &config.into(),
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        push_mono(&sink, data.iter().map(|&s| s as f32 / 32768.0), channels)
                    },
                    on_error,
                    None,
                ),
                format => {
                    return Err(AppError::Audio(format!(
                        "Unsupported sample format: {:?}",
                        format
                    )))
                }
            }
            .map_err(|e| AppError::Audio(format!("Microphone unavailable: {}", e)))?;

            stream
                .play()
                .map_err(|e| AppError::Audio(format!("Failed to start microphone: {}", e)))?;

            log::info!(
                "Microphone opened ({}, {}Hz)",
                device.name().unwrap_or_default(),
                sample_rate
            );

            Ok(Arc::new(CpalMicrophone {
                stream: Mutex::new(Some(SendStream(stream))),
                buffer,
                sample_rate,
            }))
        }

        fn open_level_meter(&self) -> Result<Arc<dyn AudioLevelMeter>> {
            Ok(Arc::new(RmsMeter))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts open handles so tests can check that everything acquired is
    /// released again.
    #[derive(Default)]
    pub struct MockDevices {
        pub outstanding: Arc<AtomicUsize>,
        pub acquired: AtomicUsize,
        pub deny: AtomicBool,
        pub samples: Mutex<Vec<f32>>,
    }

    impl MockDevices {
        pub fn outstanding(&self) -> usize {
            self.outstanding.load(Ordering::SeqCst)
        }
    }

    pub struct MockMicrophone {
        outstanding: Arc<AtomicUsize>,
        released: AtomicBool,
        samples: Mutex<Vec<f32>>,
    }

    impl MicrophoneStream for MockMicrophone {
        fn sample_rate(&self) -> u32 {
            16_000
        }

        fn take_samples(&self) -> Vec<f32> {
            // keeps yielding the same chunk, like a steady speaker
            self.samples.lock().clone()
        }

        fn stop(&self) {
            if !self.released.swap(true, Ordering::SeqCst) {
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    impl Drop for MockMicrophone {
        fn drop(&mut self) {
            self.stop();
        }
    }

    pub struct MockMeter {
        outstanding: Arc<AtomicUsize>,
        released: AtomicBool,
    }

    impl AudioLevelMeter for MockMeter {
        fn level(&self, samples: &[f32]) -> f32 {
            rms(samples)
        }

        fn close(&self) {
            if !self.released.swap(true, Ordering::SeqCst) {
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    impl MediaDevices for MockDevices {
        fn open_microphone(&self) -> Result<Arc<dyn MicrophoneStream>> {
            if self.deny.load(Ordering::SeqCst) {
                return Err(AppError::Audio("Permission denied".into()));
            }
            self.outstanding.fetch_add(1, Ordering::SeqCst);
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockMicrophone {
                outstanding: Arc::clone(&self.outstanding),
                released: AtomicBool::new(false),
                samples: Mutex::new(self.samples.lock().clone()),
            }))
        }

        fn open_level_meter(&self) -> Result<Arc<dyn AudioLevelMeter>> {
            self.outstanding.fetch_add(1, Ordering::SeqCst);
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockMeter {
                outstanding: Arc::clone(&self.outstanding),
                released: AtomicBool::new(false),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert!(RmsMeter.level(&[0.0; 64]) < 0.01);
    }

    #[test]
    fn test_encode_wav_header_and_length() {
        let samples = vec![0.0f32, 0.5, -0.5, 1.5];
        let bytes = encode_wav(&samples, 16_000).unwrap();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        let decoded: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, vec![0, 16383, -16383, 32767]);
    }
}
