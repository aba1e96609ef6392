//! Allocator primitives
//!
//! Two strategies over a pool of values, both rebuilt from the prior
//! assignments on every call:
//!
//! - `NextFreeValueFromRanges`: first free stride-aligned value from a list of
//!   inclusive ranges, scanning forward from a cursor.
//! - `Balanced`: the least used value of a fixed candidate set.
//!
//! `allocate` drives either one over `known` assignments and the `updates` set
//! of live keys, keeping every live key's prior value.

use crate::error::AllocatorError;
use std::collections::{BTreeMap, HashSet};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Common capability set of the allocators
pub trait ValueAllocator<V> {
    /// Reserve `value`, error if it is not part of the pool
    fn add(&mut self, value: &V) -> Result<(), AllocatorError>;

    /// Release `value`
    fn remove(&mut self, value: &V);

    /// Hand out the next value
    fn next(&mut self) -> Result<V, AllocatorError>;
}

/// Unsigned integers the range allocator works with
pub trait RangeValue: Copy + Ord + Hash + Debug + Display {
    fn to_u64(self) -> u64;
    fn from_u64(value: u64) -> Option<Self>;
}

impl RangeValue for u16 {
    fn to_u64(self) -> u64 {
        u64::from(self)
    }

    fn from_u64(value: u64) -> Option<Self> {
        u16::try_from(value).ok()
    }
}

impl RangeValue for u32 {
    fn to_u64(self) -> u64 {
        u64::from(self)
    }

    fn from_u64(value: u64) -> Option<Self> {
        u32::try_from(value).ok()
    }
}

/// Next free value from an ordered list of inclusive ranges
///
/// Only multiples of `stride` are handed out. The cursor never moves back, so a
/// value released during one call is not reused by the same call unless the
/// scan has not passed it yet.
#[derive(Debug, Clone)]
pub struct NextFreeValueFromRanges<V: RangeValue> {
    ranges: Vec<(u64, u64)>,
    stride: u64,
    taken: HashSet<u64>,
    cursor_range: usize,
    cursor_value: u64,
    _value: std::marker::PhantomData<V>,
}

impl<V: RangeValue> NextFreeValueFromRanges<V> {
    pub fn new(ranges: &[(V, V)], stride: V) -> Result<Self, AllocatorError> {
        let stride = stride.to_u64();
        let mut converted = Vec::with_capacity(ranges.len());
        for (from, to) in ranges {
            let (from, to) = (from.to_u64(), to.to_u64());
            if from > to || stride == 0 {
                return Err(AllocatorError::InvalidRange { from, to, stride });
            }
            converted.push((from, to));
        }
        Ok(Self {
            ranges: converted,
            stride,
            taken: HashSet::new(),
            cursor_range: 0,
            cursor_value: 0,
            _value: std::marker::PhantomData,
        })
    }

    fn in_pool(&self, value: u64) -> bool {
        self.ranges
            .iter()
            .any(|(from, to)| *from <= value && value <= *to)
    }
}

impl<V: RangeValue> ValueAllocator<V> for NextFreeValueFromRanges<V> {
    fn add(&mut self, value: &V) -> Result<(), AllocatorError> {
        let v = value.to_u64();
        if !self.in_pool(v) {
            return Err(AllocatorError::OutOfPool(value.to_string()));
        }
        self.taken.insert(v);
        Ok(())
    }

    fn remove(&mut self, value: &V) {
        self.taken.remove(&value.to_u64());
    }

    fn next(&mut self) -> Result<V, AllocatorError> {
        while let Some(&(from, to)) = self.ranges.get(self.cursor_range) {
            let start = self.cursor_value.max(from);
            let mut candidate = start.div_ceil(self.stride) * self.stride;
            while candidate <= to {
                if !self.taken.contains(&candidate) {
                    let value = V::from_u64(candidate)
                        .ok_or_else(|| AllocatorError::OutOfPool(candidate.to_string()))?;
                    self.taken.insert(candidate);
                    self.cursor_value = candidate + self.stride;
                    return Ok(value);
                }
                candidate += self.stride;
            }
            self.cursor_range += 1;
            self.cursor_value = 0;
        }
        Err(AllocatorError::Exhausted)
    }
}

/// Least used value of a fixed candidate set
///
/// Ties go to the smallest value, so allocation is deterministic.
#[derive(Debug, Clone)]
pub struct Balanced<V: Ord + Clone> {
    usage: BTreeMap<V, usize>,
}

impl<V: Ord + Clone> Balanced<V> {
    pub fn new(candidates: impl IntoIterator<Item = V>) -> Self {
        Self {
            usage: candidates.into_iter().map(|v| (v, 0)).collect(),
        }
    }

    /// Current usage counter of `value`
    pub fn usage(&self, value: &V) -> Option<usize> {
        self.usage.get(value).copied()
    }
}

impl<V: Ord + Clone + Display> ValueAllocator<V> for Balanced<V> {
    fn add(&mut self, value: &V) -> Result<(), AllocatorError> {
        let count = self
            .usage
            .get_mut(value)
            .ok_or_else(|| AllocatorError::OutOfPool(value.to_string()))?;
        *count += 1;
        Ok(())
    }

    fn remove(&mut self, value: &V) {
        if let Some(count) = self.usage.get_mut(value) {
            *count = count.saturating_sub(1);
        }
    }

    fn next(&mut self) -> Result<V, AllocatorError> {
        let (value, count) = self
            .usage
            .iter_mut()
            .min_by_key(|(_, count)| **count)
            .ok_or(AllocatorError::EmptyCandidateSet)?;
        *count += 1;
        Ok(value.clone())
    }
}

/// Assign values to every live key, keeping prior assignments
///
/// Prior values of dead keys are released first, then prior values of live
/// keys are reserved, then new live keys get fresh values in key order. Any
/// failure fails the whole call.
pub fn allocate<V, A>(
    allocator: &mut A,
    known: &BTreeMap<String, V>,
    updates: &BTreeMap<String, bool>,
) -> Result<BTreeMap<String, V>, AllocatorError>
where
    V: Clone,
    A: ValueAllocator<V>,
{
    let live = |key: &String| updates.get(key).copied().unwrap_or(false);

    for (key, value) in known {
        if !live(key) {
            allocator.remove(value);
        }
    }

    let mut result = BTreeMap::new();
    for (key, value) in known {
        if live(key) {
            allocator.add(value)?;
            result.insert(key.clone(), value.clone());
        }
    }

    for (key, present) in updates {
        if *present && !result.contains_key(key) {
            result.insert(key.clone(), allocator.next()?);
        }
    }

    Ok(result)
}

/// Mark every key as live
pub fn live_keys<'a>(keys: impl IntoIterator<Item = &'a String>) -> BTreeMap<String, bool> {
    keys.into_iter().map(|k| (k.clone(), true)).collect()
}

#[cfg(test)]
mod allocator_test;
