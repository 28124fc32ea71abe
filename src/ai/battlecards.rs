use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::stt::{BattlecardMatch, ContextAnalyzer};
use crate::error::Result;

pub const BATTLECARD_TTL: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battlecard {
    pub id: String,
    pub title: String,
    pub content: String,
}

/// Transient hints on screen. Each card lives for [`BATTLECARD_TTL`] and a
/// title already showing is not added twice.
#[derive(Debug, Default)]
pub struct BattlecardBoard {
    cards: Vec<(Battlecard, Instant)>,
}

impl BattlecardBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new card, or `None` when its title is already active.
    pub fn add(&mut self, title: &str, content: &str, now: Instant) -> Option<Battlecard> {
        self.expire(now);
        if self.cards.iter().any(|(card, _)| card.title == title) {
            return None;
        }
        let card = Battlecard {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            content: content.to_string(),
        };
        self.cards.push((card.clone(), now + BATTLECARD_TTL));
        Some(card)
    }

    pub fn add_matches(&mut self, matches: &[BattlecardMatch], now: Instant) -> Vec<Battlecard> {
        matches
            .iter()
            .filter_map(|m| self.add(&m.title, &m.content, now))
            .collect()
    }

    /// Drops expired cards and returns them.
    pub fn expire(&mut self, now: Instant) -> Vec<Battlecard> {
        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.cards)
            .into_iter()
            .partition(|(_, deadline)| *deadline <= now);
        self.cards = live;
        expired.into_iter().map(|(card, _)| card).collect()
    }

    pub fn active(&self, now: Instant) -> Vec<Battlecard> {
        self.cards
            .iter()
            .filter(|(_, deadline)| *deadline > now)
            .map(|(card, _)| card.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.cards.clear();
    }
}

struct CardTemplate {
    triggers: &'static [&'static str],
    title: &'static str,
    content: &'static str,
}

static DEFAULT_CARDS: Lazy<Vec<CardTemplate>> = Lazy::new(|| {
    vec![
        CardTemplate {
            triggers: &["price", "cost", "expensive"],
            title: "💰 Pricing Defense",
            content: "We are 20% cheaper than Cluely. Highlight our 'Lifetime License' vs their subscription.",
        },
        CardTemplate {
            triggers: &["security", "compliance", "offline"],
            title: "🛡️ Security First",
            content: "Emphasize: We run LOCALLY. No audio is ever sent to the cloud.",
        },
        CardTemplate {
            triggers: &["demo", "show me"],
            title: "✨ Demo Flow",
            content: "1. Show Live Transcription. 2. Show Battlecard Trigger. 3. Show 'God Mode' Overlay.",
        },
    ]
});

/// In-process substring matcher over the default card table, used in
/// place of the helper's `/analyze-context` endpoint.
pub struct KeywordAnalyzer;

impl KeywordAnalyzer {
    pub fn matches(text: &str) -> Vec<BattlecardMatch> {
        let text = text.to_lowercase();
        DEFAULT_CARDS
            .iter()
            .filter(|card| card.triggers.iter().any(|t| text.contains(t)))
            .map(|card| BattlecardMatch {
                triggers: card.triggers.iter().map(|t| t.to_string()).collect(),
                title: card.title.to_string(),
                content: card.content.to_string(),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ContextAnalyzer for KeywordAnalyzer {
    async fn analyze(&self, text: &str) -> Result<Vec<BattlecardMatch>> {
        Ok(Self::matches(text))
    }
}
