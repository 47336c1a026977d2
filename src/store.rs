// # Store Dispatcher
//
// Implements the storage-command semantics (ADD/SET/REPLACE/APPEND/PREPEND/
// CAS) and INCR/DECR arithmetic on top of the item lifecycle. The caller
// hands in a reference-owning candidate item; temporary references taken
// here are released before returning.

use crate::engine::{ArithmeticResult, StoreOperation};
use crate::error::{EngineError, Result};
use crate::item::{ItemId, ItemStore};
use crate::server::RelTime;

impl ItemStore {
    /// Store a candidate item under its own key according to `op`.
    pub(crate) fn store_item(&mut self, it: ItemId, op: StoreOperation, now: RelTime) -> Result<()> {
        let key = self.slabs.slot(it).key().to_vec();
        let old_it = self.get(&key, now);
        let mut new_it = None;

        let outcome = self.apply_store(it, op, old_it, &mut new_it, &key, now);

        if let Some(old) = old_it {
            self.release(old);
        }
        if let Some(new) = new_it {
            self.release(new);
        }
        outcome
    }

    fn apply_store(
        &mut self,
        it: ItemId,
        op: StoreOperation,
        old_it: Option<ItemId>,
        new_it: &mut Option<ItemId>,
        key: &[u8],
        now: RelTime,
    ) -> Result<()> {
        match (old_it, op) {
            (Some(old), StoreOperation::Add) => {
                // ADD never overwrites, but it does promote the existing item
                self.touch(old, now);
                Err(EngineError::NotStored)
            }
            (None, StoreOperation::Replace | StoreOperation::Append | StoreOperation::Prepend) => {
                Err(EngineError::NotStored)
            }
            (old_it, StoreOperation::Cas) => {
                let Some(old) = old_it else {
                    return Err(EngineError::KeyNotFound);
                };
                let expected = self.slabs.slot(old).cas;
                let given = self.slabs.slot(it).cas;
                if given == expected {
                    self.replace(old, it, now);
                    Ok(())
                } else {
                    if self.config.verbose > 1 {
                        tracing::debug!(expected, given, "cas mismatch");
                    }
                    Err(EngineError::KeyExists)
                }
            }
            (old_it, op) => {
                let mut candidate = it;
                if let (Some(old), StoreOperation::Append | StoreOperation::Prepend) = (old_it, op)
                {
                    let given = self.slabs.slot(it).cas;
                    if given != 0 && given != self.slabs.slot(old).cas {
                        return Err(EngineError::KeyExists);
                    }
                    candidate = self
                        .concatenate(it, old, op, key, now)
                        .ok_or(EngineError::NotStored)?;
                    *new_it = Some(candidate);
                }
                if let Some(old) = old_it {
                    self.replace(old, candidate, now);
                } else {
                    self.link(candidate, now);
                }
                Ok(())
            }
        }
    }

    /// Build the combined item for APPEND/PREPEND. The two values share one
    /// trailing CRLF, hence the two-byte discount.
    fn concatenate(
        &mut self,
        it: ItemId,
        old: ItemId,
        op: StoreOperation,
        key: &[u8],
        now: RelTime,
    ) -> Option<ItemId> {
        let new_len = self.slabs.slot(it).nbytes as usize;
        let old_len = self.slabs.slot(old).nbytes as usize;
        if new_len < 2 || old_len < 2 {
            return None;
        }
        let total = new_len + old_len - 2;
        let flags = self.slabs.slot(it).flags;
        let exptime = self.slabs.slot(old).exptime;

        let combined = self.alloc(key, flags, exptime, total, now)?;
        let old_value = self.slabs.slot(old).value().to_vec();
        let new_value = self.slabs.slot(it).value().to_vec();
        let dst = self.slabs.slot_mut(combined).value_mut();
        if op == StoreOperation::Append {
            dst[..old_len].copy_from_slice(&old_value);
            dst[old_len - 2..].copy_from_slice(&new_value);
        } else {
            dst[..new_len].copy_from_slice(&new_value);
            dst[new_len - 2..].copy_from_slice(&old_value);
        }
        Some(combined)
    }

    /// INCR/DECR. Increments wrap modulo 2^64; decrements saturate at zero.
    /// A result that still fits the chunk is rewritten in place with a fresh
    /// CAS version; otherwise the item is re-allocated and stored as a SET.
    pub(crate) fn arithmetic(
        &mut self,
        key: &[u8],
        increment: bool,
        create: bool,
        delta: u64,
        initial: u64,
        exptime: RelTime,
        cas: u64,
        now: RelTime,
    ) -> Result<ArithmeticResult> {
        let Some(it) = self.get_nocheck(key) else {
            if !create {
                return Err(EngineError::KeyNotFound);
            }
            let body = format!("{initial}\r\n");
            let Some(created) = self.alloc(key, 0, exptime, body.len(), now) else {
                return Err(EngineError::OutOfMemory);
            };
            self.slabs
                .slot_mut(created)
                .value_mut()
                .copy_from_slice(body.as_bytes());
            let stored = self.store_item(created, StoreOperation::Set, now);
            let new_cas = self.slabs.slot(created).cas;
            self.release(created);
            return stored.map(|_| ArithmeticResult {
                value: initial,
                cas: new_cas,
            });
        };

        let current_cas = self.slabs.slot(it).cas;
        if cas != 0 && cas != current_cas {
            self.release(it);
            return Err(EngineError::KeyExists);
        }

        let Some(current) = parse_decimal(self.slabs.slot(it).value()) else {
            self.release(it);
            return Err(EngineError::InvalidArgument(
                "cannot increment or decrement non-numeric value".to_string(),
            ));
        };

        let value = if increment {
            current.wrapping_add(delta)
        } else if delta < current {
            current - delta
        } else {
            0
        };
        let digits = value.to_string();
        let nbytes = self.slabs.slot(it).nbytes as usize;

        if digits.len() + 2 > nbytes {
            // no room in the current chunk
            let Some(grown) = self.alloc(key, 0, exptime, digits.len() + 2, now) else {
                self.release(it);
                return Err(EngineError::OutOfMemory);
            };
            {
                let dst = self.slabs.slot_mut(grown).value_mut();
                dst[..digits.len()].copy_from_slice(digits.as_bytes());
                dst[digits.len()..].copy_from_slice(b"\r\n");
            }
            let stored = self.store_item(grown, StoreOperation::Set, now);
            let new_cas = self.slabs.slot(grown).cas;
            self.release(grown);
            self.release(it);
            stored.map(|_| ArithmeticResult {
                value,
                cas: new_cas,
            })
        } else {
            let new_cas = if self.config.use_cas {
                self.next_cas()
            } else {
                0
            };
            let slot = self.slabs.slot_mut(it);
            let dst = slot.value_mut();
            let len = dst.len();
            dst[..digits.len()].copy_from_slice(digits.as_bytes());
            for byte in &mut dst[digits.len()..len - 2] {
                *byte = b' ';
            }
            dst[len - 2..].copy_from_slice(b"\r\n");
            slot.cas = new_cas;
            self.release(it);
            Ok(ArithmeticResult {
                value,
                cas: new_cas,
            })
        }
    }
}

/// Parse a value as unsigned decimal: leading digits, optionally followed by
/// padding and the CRLF terminator.
fn parse_decimal(bytes: &[u8]) -> Option<u64> {
    let end = bytes
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(bytes.len());
    if end == 0 {
        return None;
    }
    if !bytes[end..]
        .iter()
        .all(|&b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
    {
        return None;
    }
    std::str::from_utf8(&bytes[..end]).ok()?.parse::<u64>().ok()
}
