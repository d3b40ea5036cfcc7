//! Entity path layout and reservation node naming.
//!
//! A coordination object (one lock, one semaphore) lives at an entity
//! path of the form
//! `<base>/<context>/coord/<cluster>/<category>/<entity>`. Each acquire
//! attempt creates one sequential ephemeral child of the entity path,
//! named `<prefix>-<owner>_<sequence>` where the store assigns the
//! zero-padded sequence suffix.

use zk_coord_core::error::{CoordError, CoordResult};
use zk_coord_store::paths;

/// Category segment of an entity path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationCategory {
    LockExclusive,
    LockShared,
    Semaphore,
}

impl ReservationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationCategory::LockExclusive => "lock-exclusive",
            ReservationCategory::LockShared => "lock-shared",
            ReservationCategory::Semaphore => "semaphore",
        }
    }
}

/// The kind of claim one reservation node makes on its entity.
///
/// A reader-writer lock keeps `Shared` and `Exclusive` reservations under
/// one entity node so they share the parent's sequence space; the
/// eligibility rules compare across types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationType {
    Exclusive,
    Shared,
    Semaphore,
}

impl ReservationType {
    pub fn prefix(&self) -> &'static str {
        match self {
            ReservationType::Exclusive => "excl",
            ReservationType::Shared => "shrd",
            ReservationType::Semaphore => "sema",
        }
    }

    /// Classifies a reservation node name by its prefix; `None` for
    /// foreign children that take no part in eligibility.
    pub fn of_node_name(name: &str) -> Option<ReservationType> {
        let prefix = name.split('-').next()?;
        match prefix {
            "excl" => Some(ReservationType::Exclusive),
            "shrd" => Some(ReservationType::Shared),
            "sema" => Some(ReservationType::Semaphore),
            _ => None,
        }
    }
}

/// The name (without sequence) for a new reservation node.
pub fn reservation_node_name(rtype: ReservationType, owner: &str) -> String {
    format!("{}-{}_", rtype.prefix(), owner)
}

/// Parses the store-assigned sequence suffix of a reservation node name.
pub fn sequence_of(name: &str) -> Option<u64> {
    name.rsplit('_').next()?.parse().ok()
}

/// Builds entity paths from the configured namespace tokens.
#[derive(Debug, Clone)]
pub struct EntityPathBuilder {
    base_path: String,
    path_context: String,
    cluster_id: String,
}

impl EntityPathBuilder {
    pub fn new(base_path: &str, path_context: &str, cluster_id: &str) -> CoordResult<Self> {
        paths::validate(base_path)?;
        if base_path == "/" {
            return Err(CoordError::Config(
                "base path must not be the root".to_string(),
            ));
        }
        paths::validate_token(path_context)?;
        paths::validate_token(cluster_id)?;
        Ok(Self {
            base_path: base_path.to_string(),
            path_context: path_context.to_string(),
            cluster_id: cluster_id.to_string(),
        })
    }

    /// The entity path for a named coordination object.
    pub fn entity_path(&self, category: ReservationCategory, entity: &str) -> CoordResult<String> {
        paths::validate_token(entity)?;
        Ok(format!(
            "{}/{}/coord/{}/{}/{}",
            self.base_path,
            self.path_context,
            self.cluster_id,
            category.as_str(),
            entity
        ))
    }
}
