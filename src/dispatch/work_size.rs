//! NDRange descriptors.

use crate::error::{Error, Result};
use std::fmt;

/// A 1–3 dimensional global extent with an optional work-group extent.
///
/// Construction never fails; [`WorkSize::validate`] runs at dispatch time so
/// that an invalid range is rejected before anything is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkSize {
    global: Vec<usize>,
    local: Option<Vec<usize>>,
}

impl WorkSize {
    pub fn new(global: &[usize]) -> Self {
        Self {
            global: global.to_vec(),
            local: None,
        }
    }

    pub fn one_d(x: usize) -> Self {
        Self::new(&[x])
    }

    pub fn two_d(x: usize, y: usize) -> Self {
        Self::new(&[x, y])
    }

    pub fn three_d(x: usize, y: usize, z: usize) -> Self {
        Self::new(&[x, y, z])
    }

    pub fn with_local(mut self, local: &[usize]) -> Self {
        self.local = Some(local.to_vec());
        self
    }

    pub fn dims(&self) -> usize {
        self.global.len()
    }

    pub fn global(&self) -> &[usize] {
        &self.global
    }

    pub fn local(&self) -> Option<&[usize]> {
        self.local.as_deref()
    }

    /// Number of work-items in the whole range, saturating at `usize::MAX`
    /// for ranges [`WorkSize::validate`] rejects.
    pub fn total_items(&self) -> usize {
        self.global
            .iter()
            .fold(1usize, |acc, &g| acc.saturating_mul(g))
    }

    /// Checks dimensionality, non-zero extents, that the item count fits in
    /// `usize`, divisibility of the global extent by the local extent, and
    /// the device's work-group size limit.
    pub fn validate(&self, max_work_group_size: usize) -> Result<()> {
        let dims = self.global.len();
        if dims == 0 || dims > 3 {
            return Err(Error::work_size(format!(
                "expected 1 to 3 dimensions, got {}",
                dims
            )));
        }

        if let Some(dim) = self.global.iter().position(|&g| g == 0) {
            return Err(Error::work_size(format!(
                "global extent is zero in dimension {}",
                dim
            )));
        }

        if self
            .global
            .iter()
            .try_fold(1usize, |acc, &g| acc.checked_mul(g))
            .is_none()
        {
            return Err(Error::work_size(format!(
                "global range {:?} has more work-items than fit in usize",
                self.global
            )));
        }

        let Some(local) = &self.local else {
            return Ok(());
        };

        if local.len() != dims {
            return Err(Error::work_size(format!(
                "local extent has {} dimensions, global has {}",
                local.len(),
                dims
            )));
        }

        for (dim, (&g, &l)) in self.global.iter().zip(local.iter()).enumerate() {
            if l == 0 {
                return Err(Error::work_size(format!(
                    "local extent is zero in dimension {}",
                    dim
                )));
            }
            if g % l != 0 {
                return Err(Error::work_size(format!(
                    "global extent {} is not divisible by local extent {} in dimension {}",
                    g, l, dim
                )));
            }
        }

        let group_items = local
            .iter()
            .try_fold(1usize, |acc, &l| acc.checked_mul(l))
            .unwrap_or(usize::MAX);
        if group_items > max_work_group_size {
            return Err(Error::work_size(format!(
                "work-group of {} items exceeds the device limit of {}",
                group_items, max_work_group_size
            )));
        }

        Ok(())
    }
}

impl fmt::Display for WorkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "global {:?}", self.global)?;
        if let Some(local) = &self.local {
            write!(f, " local {:?}", local)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divisible_local_is_valid() {
        let work = WorkSize::three_d(64, 32, 32).with_local(&[8, 8, 4]);
        assert!(work.validate(1024).is_ok());
        assert_eq!(work.total_items(), 64 * 32 * 32);
    }

    #[test]
    fn test_indivisible_local_is_rejected() {
        let work = WorkSize::one_d(100).with_local(&[32]);
        let err = work.validate(1024).unwrap_err();
        assert!(matches!(err, Error::InvalidWorkSize(_)));
        assert!(err.to_string().contains("not divisible"));
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let work = WorkSize::two_d(64, 32).with_local(&[16]);
        assert!(work.validate(1024).is_err());
    }

    #[test]
    fn test_bad_dimensionality() {
        assert!(WorkSize::new(&[]).validate(1024).is_err());
        assert!(WorkSize::new(&[2, 2, 2, 2]).validate(1024).is_err());
        assert!(WorkSize::one_d(0).validate(1024).is_err());
    }

    #[test]
    fn test_group_larger_than_device_limit() {
        let work = WorkSize::two_d(64, 64).with_local(&[32, 32]);
        assert!(work.validate(256).is_err());
        assert!(work.validate(1024).is_ok());
    }

    #[test]
    fn test_overflowing_range_is_rejected() {
        let work = WorkSize::three_d(usize::MAX / 2, 4, 1);
        let err = work.validate(1024).unwrap_err();
        assert!(matches!(err, Error::InvalidWorkSize(_)));
        assert_eq!(work.total_items(), usize::MAX);
    }

    #[test]
    fn test_no_local_extent_only_checks_global() {
        assert!(WorkSize::two_d(20, 20).validate(1).is_ok());
    }
}
