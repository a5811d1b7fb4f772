//! Issued quotes and their single-use claim by match requests.

use std::collections::HashMap;
use std::fmt;

use bevy_ecs::prelude::Resource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MatchError;
use crate::fare::FareBreakdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteId(pub u64);

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// An issued price. Immutable; the total is the binding fare for the ride.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    #[serde(flatten)]
    pub fare: FareBreakdown,
    pub created_at: DateTime<Utc>,
    /// Engine time (ms) at issue. The quote is claimable up to and including
    /// `expires_at_ms`.
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl Quote {
    pub fn total_fare(&self) -> u64 {
        self.fare.total_fare
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }
}

#[derive(Debug)]
struct QuoteEntry {
    quote: Quote,
    consumed: bool,
}

#[derive(Debug, Default, Resource)]
pub struct QuoteBook {
    next_id: u64,
    entries: HashMap<QuoteId, QuoteEntry>,
}

impl QuoteBook {
    pub fn issue(
        &mut self,
        fare: FareBreakdown,
        created_at: DateTime<Utc>,
        now_ms: u64,
        ttl_ms: u64,
    ) -> Quote {
        self.next_id += 1;
        let quote = Quote {
            id: QuoteId(self.next_id),
            fare,
            created_at,
            created_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        };
        self.entries.insert(
            quote.id,
            QuoteEntry {
                quote: quote.clone(),
                consumed: false,
            },
        );
        quote
    }

    pub fn get(&self, id: QuoteId) -> Option<&Quote> {
        self.entries.get(&id).map(|entry| &entry.quote)
    }

    /// Looks up a claimable quote without consuming it.
    pub fn lookup(&self, id: QuoteId, now_ms: u64) -> Result<&Quote, MatchError> {
        let entry = self.entry(id)?;
        if entry.consumed {
            return Err(MatchError::QuoteAlreadyConsumed(id));
        }
        if entry.quote.is_expired(now_ms) {
            return Err(MatchError::QuoteExpired(id));
        }
        Ok(&entry.quote)
    }

    /// Marks the quote as used by a match request. A quote can be claimed once,
    /// and only before it expires.
    pub fn claim(&mut self, id: QuoteId, now_ms: u64) -> Result<Quote, MatchError> {
        let quote = self.lookup(id, now_ms)?.clone();
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.consumed = true;
        }
        Ok(quote)
    }

    /// Drops every expired quote, claimed or not. Returns how many were removed.
    /// Consumed quotes stay until they expire so reuse is still reported as such.
    pub fn purge_expired(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.quote.is_expired(now_ms));
        before - self.entries.len()
    }

    fn entry(&self, id: QuoteId) -> Result<&QuoteEntry, MatchError> {
        match self.entries.get(&id) {
            Some(entry) => Ok(entry),
            // Issued ids only leave the book by expiring.
            None if id.0 >= 1 && id.0 <= self.next_id => Err(MatchError::QuoteExpired(id)),
            None => Err(MatchError::QuoteNotFound(id)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
