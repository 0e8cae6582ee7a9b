//! Remix royalties.
//!
//! When a derivative clip is approved, its base reward is split between the
//! remixer and the owner of the clip it was derived from. The remixer keeps
//! `remixer_bps` (70% by default) and any rounding remainder; the original
//! owner gets the rest. Only the immediate parent is paid.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use vox_db::queries::clips::{self, ClipRow};
use vox_db::UnitOfWork;
use vox_types::{Timestamp, TransactionKind, BPS_DENOMINATOR};

use crate::ledger;
use crate::payout::apply_bps;
use crate::{LedgerError, Result};

/// Default remixer share: 70%.
pub const DEFAULT_REMIXER_BPS: u32 = 7_000;

/// Ancestry walks stop after this many hops.
pub const MAX_REMIX_DEPTH: u32 = 10;

/// Remix royalty configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoyaltySplit {
    /// Remixer's share of the base reward, in basis points.
    pub remixer_bps: u32,
}

impl Default for RoyaltySplit {
    fn default() -> Self {
        Self {
            remixer_bps: DEFAULT_REMIXER_BPS,
        }
    }
}

/// Amounts credited by [`RoyaltySplit::settle`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoyaltyPayout {
    pub remixer_id: String,
    pub remixer_amount: i64,
    pub original_owner_id: String,
    pub original_amount: i64,
}

impl RoyaltySplit {
    pub fn new(remixer_bps: u32) -> Result<Self> {
        let split = Self { remixer_bps };
        split.validate()?;
        Ok(split)
    }

    pub fn validate(&self) -> Result<()> {
        if i64::from(self.remixer_bps) > BPS_DENOMINATOR {
            return Err(LedgerError::InvalidSplit(format!(
                "remixer share {} bps exceeds {BPS_DENOMINATOR}",
                self.remixer_bps
            )));
        }
        Ok(())
    }

    /// Split `base` into `(remixer, original)`. The two always sum to `base`.
    pub fn split(&self, base: i64) -> Result<(i64, i64)> {
        self.validate()?;
        let original_bps = BPS_DENOMINATOR as u32 - self.remixer_bps;
        let original = apply_bps(base, original_bps)?;
        Ok((base - original, original))
    }

    /// Credit both parties of an approved derivative clip.
    pub fn settle(
        &self,
        uow: &UnitOfWork<'_>,
        derivative: &ClipRow,
        parent: &ClipRow,
        base: i64,
        now: Timestamp,
    ) -> Result<RoyaltyPayout> {
        let (remixer_amount, original_amount) = self.split(base)?;

        if remixer_amount > 0 {
            ledger::credit(
                uow,
                &derivative.owner_id,
                remixer_amount,
                TransactionKind::Earning,
                "Remix approved",
                Some(&derivative.id),
                now,
            )?;
        }
        if original_amount > 0 {
            ledger::credit(
                uow,
                &parent.owner_id,
                original_amount,
                TransactionKind::Earning,
                &format!("Remix royalty from {}", derivative.id),
                Some(&derivative.id),
                now,
            )?;
        }

        tracing::info!(
            clip = %derivative.id,
            parent = %parent.id,
            remixer_amount,
            original_amount,
            "remix royalty settled"
        );

        Ok(RoyaltyPayout {
            remixer_id: derivative.owner_id.clone(),
            remixer_amount,
            original_owner_id: parent.owner_id.clone(),
            original_amount,
        })
    }
}

/// The clip `clip` was derived from, if it has one and it still exists.
pub fn resolve_parent(conn: &Connection, clip: &ClipRow) -> Result<Option<ClipRow>> {
    let Some(parent_id) = clip.parent_clip_id.as_deref() else {
        return Ok(None);
    };
    let parent = clips::find(conn, parent_id)?;
    if parent.is_none() {
        tracing::warn!(clip = %clip.id, parent = parent_id, "remix parent not found");
    }
    Ok(parent)
}

/// Number of existing ancestors above `clip_id`, capped at [`MAX_REMIX_DEPTH`].
pub fn remix_depth(conn: &Connection, clip_id: &str) -> Result<u32> {
    let mut depth = 0;
    let mut current = clips::find(conn, clip_id)?.and_then(|c| c.parent_clip_id);

    while let Some(parent_id) = current {
        if depth >= MAX_REMIX_DEPTH {
            tracing::warn!(clip = clip_id, "remix chain exceeds maximum depth");
            break;
        }
        match clips::find(conn, &parent_id)? {
            Some(parent) => {
                depth += 1;
                current = parent.parent_clip_id;
            }
            None => break,
        }
    }
    Ok(depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_db::queries::clips::NewClip;
    use vox_db::queries::profiles::{self, NewProfile};
    use vox_db::transact;

    fn add_clip(conn: &Connection, id: &str, owner: &str, parent: Option<&str>) {
        clips::insert(
            conn,
            &NewClip {
                id,
                owner_id: owner,
                language: "en",
                parent_clip_id: parent,
            },
            0,
        )
        .expect("insert clip");
    }

    #[test]
    fn test_default_split() {
        let split = RoyaltySplit::default();
        assert_eq!(split.split(100_000).expect("split"), (70_000, 30_000));
    }

    #[test]
    fn test_remainder_goes_to_remixer() {
        let split = RoyaltySplit::default();
        assert_eq!(split.split(7).expect("split"), (5, 2));
        assert_eq!(split.split(1).expect("split"), (1, 0));
    }

    #[test]
    fn test_invalid_split() {
        assert!(RoyaltySplit::new(10_001).is_err());
        assert!(RoyaltySplit::new(10_000).is_ok());
    }

    #[test]
    fn test_settle_credits_both_owners() {
        let mut conn = vox_db::open_memory().expect("open");
        profiles::insert(&conn, &NewProfile::new("orig"), 0).expect("insert");
        profiles::insert(&conn, &NewProfile::new("remixer"), 0).expect("insert");
        add_clip(&conn, "p", "orig", None);
        add_clip(&conn, "d", "remixer", Some("p"));

        let derivative = clips::find(&conn, "d").expect("find").expect("exists");
        let parent = resolve_parent(&conn, &derivative)
            .expect("resolve")
            .expect("parent");

        let payout = transact(&mut conn, |uow| {
            RoyaltySplit::default().settle(uow, &derivative, &parent, 100_000, 1)
        })
        .expect("settle");

        assert_eq!(payout.remixer_amount, 70_000);
        assert_eq!(payout.original_amount, 30_000);
        assert_eq!(profiles::get(&conn, "remixer").expect("get").balance, 70_000);
        assert_eq!(profiles::get(&conn, "orig").expect("get").balance, 30_000);
    }

    #[test]
    fn test_missing_parent_resolves_to_none() {
        let conn = vox_db::open_memory().expect("open");
        profiles::insert(&conn, &NewProfile::new("remixer"), 0).expect("insert");
        add_clip(&conn, "d", "remixer", Some("gone"));
        let derivative = clips::find(&conn, "d").expect("find").expect("exists");
        assert_eq!(resolve_parent(&conn, &derivative).expect("resolve"), None);
    }

    #[test]
    fn test_remix_depth() {
        let conn = vox_db::open_memory().expect("open");
        profiles::insert(&conn, &NewProfile::new("u"), 0).expect("insert");
        add_clip(&conn, "c0", "u", None);
        for i in 1..=12 {
            add_clip(&conn, &format!("c{i}"), "u", Some(&format!("c{}", i - 1)));
        }
        assert_eq!(remix_depth(&conn, "c0").expect("depth"), 0);
        assert_eq!(remix_depth(&conn, "c3").expect("depth"), 3);
        assert_eq!(remix_depth(&conn, "c12").expect("depth"), MAX_REMIX_DEPTH);
    }
}
