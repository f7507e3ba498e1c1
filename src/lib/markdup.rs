//! Lock-free duplicate marking.
//!
//! Every qualifying record competes twice: once as a fragment (keyed by
//! library, reference id, unclipped position, and strand) and, when both
//! mates are mapped, once as half of a pair. Each group keeps its best
//! record in an atomic cell holding a record index; challengers run a
//! compare-and-swap retry loop against the cell and the loser gets the
//! duplicate FLAG bit set with an idempotent `fetch_or`. No lock is held
//! during any engine operation.
//!
//! With determinism on, ties in score fall back to QNAME order (the
//! lexicographically smaller name is retained), so the outcome is a pure
//! function of the input set. With determinism off, a tied challenger simply
//! loses, which is cheaper but lets scheduling pick the retained record.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use ahash::AHashMap;
use rayon::prelude::*;

use crate::cigar::CigarCache;
use crate::errors::{Result, SamprepError};
use crate::record::{self, SamRecord};
use crate::sharded::ShardedMap;
use crate::span::{InternPool, Span};

/// Records carrying any of these bits never enter classification.
const EXCLUDED: u16 =
    record::UNMAPPED | record::SECONDARY | record::DUPLICATE | record::SUPPLEMENTARY;

/// Read-group id to library name, from the `@RG` header lines.
///
/// An `@RG` line with an LB entry but no ID is a configuration error and
/// surfaces here, before any record is processed.
pub fn build_library_table(
    header: &crate::header::SamHeader,
) -> Result<AHashMap<Span, Span>> {
    let mut table = AHashMap::new();
    for rg in &header.rg {
        if let Some(lb) = rg.get("LB") {
            let id = rg.get("ID").ok_or(SamprepError::MissingReadGroupId)?;
            table.insert(id.clone(), lb.clone());
        }
    }
    Ok(table)
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct FragmentKey {
    library: Option<Span>,
    ref_id: i32,
    pos: i32,
    reversed: bool,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct RendezvousKey {
    library: Option<Span>,
    qname: Span,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PairKey {
    library: Option<Span>,
    ref_id1: i32,
    ref_id2: i32,
    pos1: i32,
    pos2: i32,
    reversed1: bool,
    reversed2: bool,
}

fn pack(i1: u32, i2: u32) -> u64 {
    (u64::from(i1) << 32) | u64::from(i2)
}

fn unpack(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, packed as u32)
}

/// The marking engine over one materialized batch.
pub struct DuplicateMarker<'a> {
    records: &'a [SamRecord],
    fragments: ShardedMap<FragmentKey, Arc<AtomicU32>>,
    rendezvous: ShardedMap<RendezvousKey, u32>,
    pairs: ShardedMap<PairKey, Arc<AtomicU64>>,
    deterministic: bool,
}

impl<'a> DuplicateMarker<'a> {
    #[must_use]
    pub fn new(records: &'a [SamRecord], deterministic: bool) -> Self {
        Self {
            records,
            fragments: ShardedMap::new(),
            rendezvous: ShardedMap::new(),
            pairs: ShardedMap::new(),
            deterministic,
        }
    }

    /// Runs both classifications for one record, unless it is excluded.
    pub fn classify(&self, index: u32) {
        let rec = &self.records[index as usize];
        if rec.flag_not_any(EXCLUDED) {
            self.classify_fragment(index);
            self.classify_pair(index);
        }
    }

    fn classify_fragment(&self, index: u32) {
        let rec = &self.records[index as usize];
        let key = FragmentKey {
            library: rec.library.clone(),
            ref_id: rec.ref_id,
            pos: rec.adapted_pos,
            reversed: rec.is_reversed(),
        };
        let mut inserted = false;
        let best = self.fragments.get_or_insert_with(key, || {
            inserted = true;
            Arc::new(AtomicU32::new(index))
        });
        if inserted {
            return;
        }
        if rec.is_true_fragment() {
            let score = rec.adapted_score;
            loop {
                let best_index = best.load(Ordering::Relaxed);
                let best_rec = &self.records[best_index as usize];
                if best_rec.is_true_pair() {
                    // A fragment never beats a pair occupying its position.
                    rec.set_duplicate();
                    break;
                }
                let best_score = best_rec.adapted_score;
                if best_score > score {
                    rec.set_duplicate();
                    break;
                } else if best_score == score {
                    if self.deterministic {
                        if rec.qname > best_rec.qname {
                            rec.set_duplicate();
                            break;
                        } else if self.swap(&best, best_index, index) {
                            best_rec.set_duplicate();
                            break;
                        }
                    } else {
                        rec.set_duplicate();
                        break;
                    }
                } else if self.swap(&best, best_index, index) {
                    best_rec.set_duplicate();
                    break;
                }
            }
        } else {
            // A paired read with a mapped mate occupies the fragment slot
            // without being marked itself; it displaces any best that is not
            // a true pair.
            loop {
                let best_index = best.load(Ordering::Relaxed);
                let best_rec = &self.records[best_index as usize];
                if best_rec.is_true_pair() {
                    break;
                } else if self.swap(&best, best_index, index) {
                    best_rec.set_duplicate();
                    break;
                }
            }
        }
    }

    fn swap(&self, cell: &AtomicU32, current: u32, new: u32) -> bool {
        cell.compare_exchange(current, new, Ordering::Relaxed, Ordering::Relaxed).is_ok()
    }

    fn classify_pair(&self, index: u32) {
        let rec = &self.records[index as usize];
        if !rec.is_true_pair() {
            return;
        }
        let rendezvous_key =
            RendezvousKey { library: rec.library.clone(), qname: rec.qname.clone() };
        let Some(mate_index) = self.rendezvous.insert_or_take(rendezvous_key, index) else {
            // First mate to arrive is buffered; the second completes the
            // exchange and competes on behalf of both.
            return;
        };

        let mut i1 = index;
        let mut i2 = mate_index;
        let score = self.records[i1 as usize].adapted_score
            + self.records[i2 as usize].adapted_score;
        if self.records[i1 as usize].adapted_pos > self.records[i2 as usize].adapted_pos {
            std::mem::swap(&mut i1, &mut i2);
        }
        let rec1 = &self.records[i1 as usize];
        let rec2 = &self.records[i2 as usize];

        let key = PairKey {
            library: rec1.library.clone(),
            ref_id1: rec1.ref_id,
            ref_id2: rec2.ref_id,
            pos1: rec1.adapted_pos,
            pos2: rec2.adapted_pos,
            reversed1: rec1.is_reversed(),
            reversed2: rec2.is_reversed(),
        };
        let packed = pack(i1, i2);
        let mut inserted = false;
        let best = self.pairs.get_or_insert_with(key, || {
            inserted = true;
            Arc::new(AtomicU64::new(packed))
        });
        if inserted {
            return;
        }
        loop {
            let best_packed = best.load(Ordering::Relaxed);
            let (b1, b2) = unpack(best_packed);
            let best_rec1 = &self.records[b1 as usize];
            let best_rec2 = &self.records[b2 as usize];
            let best_score = best_rec1.adapted_score + best_rec2.adapted_score;
            if best_score > score {
                rec1.set_duplicate();
                rec2.set_duplicate();
                break;
            } else if best_score == score {
                if self.deterministic {
                    if rec1.qname > best_rec1.qname {
                        rec1.set_duplicate();
                        rec2.set_duplicate();
                        break;
                    } else if best
                        .compare_exchange(best_packed, packed, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                    {
                        best_rec1.set_duplicate();
                        best_rec2.set_duplicate();
                        break;
                    }
                } else {
                    rec1.set_duplicate();
                    rec2.set_duplicate();
                    break;
                }
            } else if best
                .compare_exchange(best_packed, packed, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                best_rec1.set_duplicate();
                best_rec2.set_duplicate();
                break;
            }
        }
    }

    /// True-pair records whose mate never arrived in this batch.
    #[must_use]
    pub fn unmatched_mates(&self) -> usize {
        self.rendezvous.len()
    }
}

/// The two-phase marking stage: the adapt pass resolves libraries and derived
/// fields in parallel, then the marking pass classifies every record against
/// the shared engine state.
pub fn mark_duplicates(
    records: &mut [SamRecord],
    header: &crate::header::SamHeader,
    deterministic: bool,
    intern: &InternPool,
    cigars: &CigarCache,
) -> Result<()> {
    let lb_table = build_library_table(header)?;

    records
        .par_iter_mut()
        .filter(|rec| rec.flag_not_any(EXCLUDED))
        .map(|rec| rec.adapt(&lb_table, intern, cigars))
        .collect::<Result<()>>()?;

    let marker = DuplicateMarker::new(records, deterministic);
    (0..records.len() as u32).into_par_iter().for_each(|i| marker.classify(i));
    if marker.unmatched_mates() > 0 {
        log::debug!(
            "{} paired reads had no mate in the input",
            marker.unmatched_mates()
        );
    }
    Ok(())
}
