use crate::{QuotaCounts, StorageType};

/// Quota attached to a directory: configured limits plus the cached usage of
/// its subtree.
///
/// The cached usage lags behind the tree by whatever is still pending in the
/// [`QuotaUpdateManager`](crate::QuotaUpdateManager); it's only written by the
/// manager's merge, by quota (re)configuration and by the full recompute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryWithQuotaFeature {
    quota: QuotaCounts,
    consumed: QuotaCounts,
}

impl DirectoryWithQuotaFeature {
    pub fn new(quota: QuotaCounts, consumed: QuotaCounts) -> Self {
        Self { quota, consumed }
    }

    pub fn quota(&self) -> QuotaCounts {
        self.quota
    }

    pub fn set_quota(&mut self, quota: QuotaCounts) {
        self.quota = quota;
    }

    pub fn is_quota_set(&self) -> bool {
        self.quota.any_limited()
    }

    pub fn space_consumed(&self) -> QuotaCounts {
        self.consumed
    }

    pub(crate) fn set_space_consumed(&mut self, consumed: QuotaCounts) {
        self.consumed = consumed;
    }

    pub(crate) fn add_space_consumed(&mut self, delta: QuotaCounts) {
        self.consumed += delta;
    }

    /// Checks whether growing the subtree by `delta` stays within every
    /// configured limit.
    ///
    /// The returned error has no path yet; the caller knows where this
    /// directory lives.
    pub fn verify_quota(&self, delta: QuotaCounts) -> Result<(), QuotaExceeded> {
        let (quota, consumed) = (self.quota, self.consumed);

        if QuotaCounts::is_violated(quota.namespace, consumed.namespace, delta.namespace) {
            return Err(QuotaExceeded::new(
                QuotaKind::Namespace,
                quota.namespace,
                consumed.namespace + delta.namespace,
            ));
        }

        if QuotaCounts::is_violated(quota.diskspace, consumed.diskspace, delta.diskspace) {
            return Err(QuotaExceeded::new(
                QuotaKind::Diskspace,
                quota.diskspace,
                consumed.diskspace + delta.diskspace,
            ));
        }

        for ty in StorageType::ALL {
            let limit = quota.type_space(ty);
            let used = consumed.type_space(ty);
            let grow = delta.type_space(ty);

            if QuotaCounts::is_violated(limit, used, grow) {
                return Err(QuotaExceeded::new(
                    QuotaKind::StorageType(ty),
                    limit,
                    used + grow,
                ));
            }
        }

        Ok(())
    }

    /// Dimensions in which the cached usage already exceeds the limits.
    pub fn violations(&self) -> Vec<QuotaKind> {
        let (quota, consumed) = (self.quota, self.consumed);
        let mut kinds = Vec::new();

        if quota.namespace >= 0 && consumed.namespace > quota.namespace {
            kinds.push(QuotaKind::Namespace);
        }

        if quota.diskspace >= 0 && consumed.diskspace > quota.diskspace {
            kinds.push(QuotaKind::Diskspace);
        }

        for ty in StorageType::ALL {
            if quota.type_space(ty) >= 0 && consumed.type_space(ty) > quota.type_space(ty) {
                kinds.push(QuotaKind::StorageType(ty));
            }
        }

        kinds
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaKind {
    Namespace,
    Diskspace,
    StorageType(StorageType),
}

impl QuotaKind {
    fn describe(self) -> String {
        match self {
            QuotaKind::Namespace => "The NameSpace quota (directories and files)".into(),
            QuotaKind::Diskspace => "The DiskSpace quota".into(),
            QuotaKind::StorageType(ty) => format!("Quota by storage type {}", ty),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error(
    "{} of {} is exceeded: quota={quota} consumed={consumed}",
    .kind.describe(),
    .path.as_deref().unwrap_or("<unknown>")
)]
pub struct QuotaExceeded {
    pub kind: QuotaKind,
    pub quota: i64,
    pub consumed: i64,
    pub path: Option<String>,
}

impl QuotaExceeded {
    pub fn new(kind: QuotaKind, quota: i64, consumed: i64) -> Self {
        Self {
            kind,
            quota,
            consumed,
            path: None,
        }
    }

    pub fn with_path(mut self, path: String) -> Self {
        self.path = Some(path);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(quota: QuotaCounts, consumed: QuotaCounts) -> DirectoryWithQuotaFeature {
        DirectoryWithQuotaFeature::new(quota, consumed)
    }

    #[test]
    fn rejects_namespace_growth_past_the_limit() {
        let quota = QuotaCounts::unlimited();
        let quota = QuotaCounts { namespace: 3, ..quota };
        let f = feature(quota, QuotaCounts::new(3, 0));

        let err = f.verify_quota(QuotaCounts::new(1, 0)).unwrap_err();

        assert_eq!(QuotaKind::Namespace, err.kind);
        assert_eq!(4, err.consumed);
        assert!(f.verify_quota(QuotaCounts::new(-1, 0)).is_ok());
    }

    #[test]
    fn storage_types_are_checked_independently() {
        let quota = QuotaCounts::unlimited().with_type_space(StorageType::Ssd, 2048);
        let used = QuotaCounts::new(1, 0).with_type_space(StorageType::Ssd, 1024);
        let f = feature(quota, used);

        let grow_ssd = QuotaCounts::new(0, 3072).with_type_space(StorageType::Ssd, 1025);
        let grow_disk = QuotaCounts::new(0, 3072).with_type_space(StorageType::Disk, 1 << 30);

        assert_eq!(
            QuotaKind::StorageType(StorageType::Ssd),
            f.verify_quota(grow_ssd).unwrap_err().kind
        );
        assert!(f.verify_quota(grow_disk).is_ok());
    }

    #[test]
    fn reports_existing_violations() {
        let quota = QuotaCounts {
            diskspace: 10,
            ..QuotaCounts::unlimited()
        };
        let mut f = feature(quota, QuotaCounts::new(1, 5));

        assert!(f.violations().is_empty());

        f.add_space_consumed(QuotaCounts::new(0, 6));

        assert_eq!(vec![QuotaKind::Diskspace], f.violations());
    }

    #[test]
    fn message_names_the_directory() {
        let err = QuotaExceeded::new(QuotaKind::Diskspace, 10, 12).with_path("/a/b".into());

        assert!(err.to_string().contains("/a/b"));
    }

    #[test]
    fn message_names_the_storage_type() {
        let err = QuotaExceeded::new(QuotaKind::StorageType(StorageType::Ssd), 10, 12)
            .with_path("/hot".into());

        assert_eq!(
            "Quota by storage type SSD of /hot is exceeded: quota=10 consumed=12",
            err.to_string()
        );
    }
}
