use std::{collections::HashSet, error::Error, fmt, num::NonZeroUsize};

use serde::{Deserialize, Serialize};

/// The dimensions the client proposes for a session, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryProposal {
    pub cluster_size: usize,
    pub n_dofs: usize,
    pub n_contacts: usize,
    pub extra_width: usize,
    /// Joint names in environment order.
    pub jnt_names: Vec<String>,
    /// Whether state rows carry the root linear and angular acceleration.
    #[serde(default)]
    pub root_acc: bool,
}

impl GeometryProposal {
    /// Checks every width and the joint names, producing the immutable geometry.
    ///
    /// # Returns
    /// The agreed `ClusterGeometry` or the first violated check.
    pub fn validate(self) -> Result<ClusterGeometry, GeometryErr> {
        let cluster_size =
            NonZeroUsize::new(self.cluster_size).ok_or(GeometryErr::ZeroWidth("cluster_size"))?;
        let n_dofs = NonZeroUsize::new(self.n_dofs).ok_or(GeometryErr::ZeroWidth("n_dofs"))?;

        if self.jnt_names.len() != n_dofs.get() {
            return Err(GeometryErr::JointCountMismatch {
                n_dofs: n_dofs.get(),
                names: self.jnt_names.len(),
            });
        }

        let mut seen = HashSet::with_capacity(self.jnt_names.len());
        for name in &self.jnt_names {
            if name.is_empty() {
                return Err(GeometryErr::EmptyJointName);
            }
            if !seen.insert(name.as_str()) {
                return Err(GeometryErr::DuplicateJointName(name.clone()));
            }
        }

        Ok(ClusterGeometry {
            cluster_size,
            n_dofs,
            n_contacts: self.n_contacts,
            extra_width: self.extra_width,
            jnt_names: self.jnt_names,
            root_acc: self.root_acc,
        })
    }
}

/// The agreed shape of every shared region of a session.
///
/// Only obtainable through `GeometryProposal::validate`, also when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GeometryProposal", into = "GeometryProposal")]
pub struct ClusterGeometry {
    cluster_size: NonZeroUsize,
    n_dofs: NonZeroUsize,
    n_contacts: usize,
    extra_width: usize,
    jnt_names: Vec<String>,
    root_acc: bool,
}

impl ClusterGeometry {
    pub fn cluster_size(&self) -> usize {
        self.cluster_size.get()
    }

    pub fn n_dofs(&self) -> usize {
        self.n_dofs.get()
    }

    pub fn n_contacts(&self) -> usize {
        self.n_contacts
    }

    pub fn extra_width(&self) -> usize {
        self.extra_width
    }

    /// Joint names in environment order.
    pub fn jnt_names(&self) -> &[String] {
        &self.jnt_names
    }

    pub fn root_acc(&self) -> bool {
        self.root_acc
    }

    /// A stable 64 bit digest of the geometry, stamped into every region header.
    ///
    /// Two processes agree on the fingerprint iff they agree on every field.
    pub fn fingerprint(&self) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

        let fnv = |hash: u64, bytes: &[u8]| {
            bytes
                .iter()
                .fold(hash, |h, b| (h ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
        };

        let mut hash = FNV_OFFSET;
        for dim in [
            self.cluster_size.get(),
            self.n_dofs.get(),
            self.n_contacts,
            self.extra_width,
            usize::from(self.root_acc),
        ] {
            hash = fnv(hash, &(dim as u64).to_le_bytes());
        }

        for name in &self.jnt_names {
            hash = fnv(hash, name.as_bytes());
            hash = fnv(hash, &[0xff]);
        }

        hash
    }
}

impl TryFrom<GeometryProposal> for ClusterGeometry {
    type Error = GeometryErr;

    fn try_from(value: GeometryProposal) -> Result<Self, Self::Error> {
        value.validate()
    }
}

impl From<ClusterGeometry> for GeometryProposal {
    fn from(value: ClusterGeometry) -> Self {
        Self {
            cluster_size: value.cluster_size.get(),
            n_dofs: value.n_dofs.get(),
            n_contacts: value.n_contacts,
            extra_width: value.extra_width,
            jnt_names: value.jnt_names,
            root_acc: value.root_acc,
        }
    }
}

/// A rejected geometry proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryErr {
    ZeroWidth(&'static str),
    JointCountMismatch { n_dofs: usize, names: usize },
    DuplicateJointName(String),
    EmptyJointName,
}

impl fmt::Display for GeometryErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroWidth(field) => write!(f, "geometry field `{field}` must be greater than zero"),
            Self::JointCountMismatch { n_dofs, names } => {
                write!(f, "n_dofs is {n_dofs} but {names} joint names were given")
            }
            Self::DuplicateJointName(name) => write!(f, "joint name `{name}` appears more than once"),
            Self::EmptyJointName => f.write_str("joint names must not be empty"),
        }
    }
}

impl Error for GeometryErr {}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(n_dofs: usize) -> GeometryProposal {
        GeometryProposal {
            cluster_size: 4,
            n_dofs,
            n_contacts: 4,
            extra_width: 2,
            jnt_names: (0..n_dofs).map(|i| format!("joint_{i}")).collect(),
            root_acc: false,
        }
    }

    #[test]
    fn rejects_zero_dofs() {
        assert_eq!(proposal(0).validate(), Err(GeometryErr::ZeroWidth("n_dofs")));
    }

    #[test]
    fn rejects_zero_cluster() {
        let mut p = proposal(3);
        p.cluster_size = 0;
        assert_eq!(p.validate(), Err(GeometryErr::ZeroWidth("cluster_size")));
    }

    #[test]
    fn rejects_name_count_mismatch() {
        let mut p = proposal(3);
        p.jnt_names.pop();
        assert_eq!(
            p.validate(),
            Err(GeometryErr::JointCountMismatch { n_dofs: 3, names: 2 })
        );
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut p = proposal(3);
        p.jnt_names[2] = "joint_0".into();
        assert_eq!(
            p.validate(),
            Err(GeometryErr::DuplicateJointName("joint_0".into()))
        );
    }

    #[test]
    fn contacts_and_extra_info_may_be_absent() {
        let mut p = proposal(2);
        p.n_contacts = 0;
        p.extra_width = 0;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn fingerprint_tracks_every_field() {
        let base = proposal(12).validate().unwrap();
        assert_eq!(base.fingerprint(), proposal(12).validate().unwrap().fingerprint());

        let mut p = proposal(12);
        p.root_acc = true;
        assert_ne!(base.fingerprint(), p.validate().unwrap().fingerprint());

        let mut p = proposal(12);
        p.jnt_names.swap(0, 1);
        assert_ne!(base.fingerprint(), p.validate().unwrap().fingerprint());

        let mut p = proposal(12);
        p.extra_width = 3;
        assert_ne!(base.fingerprint(), p.validate().unwrap().fingerprint());
    }

    #[test]
    fn deserialization_validates() {
        let json = r#"{"cluster_size":1,"n_dofs":0,"n_contacts":0,"extra_width":0,"jnt_names":[]}"#;
        assert!(serde_json::from_str::<ClusterGeometry>(json).is_err());

        let geometry = proposal(2).validate().unwrap();
        let json = serde_json::to_string(&geometry).unwrap();
        let back: ClusterGeometry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, geometry);
    }
}
