use std::{collections::HashSet, error::Error, fmt};

/// Why two joint orderings cannot be matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JointMapErr {
    /// The name sets differ. Both lists keep the order of their side.
    Mismatch {
        missing_in_env: Vec<String>,
        missing_in_controller: Vec<String>,
    },
    DuplicateName {
        side: &'static str,
        name: String,
    },
}

impl fmt::Display for JointMapErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mismatch {
                missing_in_env,
                missing_in_controller,
            } => write!(
                f,
                "joint name sets differ: controller joints missing from the environment {missing_in_env:?}, \
                 environment joints missing from the controller {missing_in_controller:?}"
            ),
            Self::DuplicateName { side, name } => {
                write!(f, "joint {name:?} appears twice on the {side} side")
            }
        }
    }
}

impl Error for JointMapErr {}

/// Permutation between the environment's joint order and the controller's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointNameMap {
    /// `to_env[k]` is the environment index of controller joint `k`.
    to_env: Vec<usize>,
}

impl JointNameMap {
    /// Builds the map from both orderings.
    ///
    /// # Arguments
    /// * `env_names` - The negotiated, environment-side order.
    /// * `ctrl_names` - The order the solver works in.
    ///
    /// # Errors
    /// `DuplicateName` if either side repeats a name, `Mismatch` naming the
    /// joints present on one side only.
    pub fn new(env_names: &[String], ctrl_names: &[String]) -> Result<Self, JointMapErr> {
        let env = unique(env_names, "environment")?;
        let ctrl = unique(ctrl_names, "controller")?;

        let missing_in_env: Vec<String> = ctrl_names
            .iter()
            .filter(|n| !env.contains(n.as_str()))
            .cloned()
            .collect();
        let missing_in_controller: Vec<String> = env_names
            .iter()
            .filter(|n| !ctrl.contains(n.as_str()))
            .cloned()
            .collect();

        if !missing_in_env.is_empty() || !missing_in_controller.is_empty() {
            return Err(JointMapErr::Mismatch {
                missing_in_env,
                missing_in_controller,
            });
        }

        let to_env = ctrl_names
            .iter()
            .filter_map(|name| env_names.iter().position(|n| n == name))
            .collect();

        Ok(Self { to_env })
    }

    pub fn len(&self) -> usize {
        self.to_env.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_env.is_empty()
    }

    /// Whether both orders coincide.
    pub fn is_identity(&self) -> bool {
        self.to_env.iter().enumerate().all(|(k, i)| k == *i)
    }

    /// Reorders environment-ordered values into controller order.
    pub fn gather(&self, env: &[f32], ctrl: &mut [f32]) {
        debug_assert_eq!(env.len(), self.len());
        for (dst, &i) in ctrl.iter_mut().zip(&self.to_env) {
            *dst = env[i];
        }
    }

    /// Reorders controller-ordered values back into environment order.
    pub fn scatter(&self, ctrl: &[f32], env: &mut [f32]) {
        debug_assert_eq!(env.len(), self.len());
        for (src, &i) in ctrl.iter().zip(&self.to_env) {
            env[i] = *src;
        }
    }
}

fn unique<'a>(names: &'a [String], side: &'static str) -> Result<HashSet<&'a str>, JointMapErr> {
    let mut set = HashSet::with_capacity(names.len());
    for name in names {
        if !set.insert(name.as_str()) {
            return Err(JointMapErr::DuplicateName {
                side,
                name: name.clone(),
            });
        }
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_orders_give_the_identity() {
        let env = names(&["a", "b", "c"]);
        let map = JointNameMap::new(&env, &env).unwrap();
        assert!(map.is_identity());
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn gather_then_scatter_restores_environment_order() {
        let env = names(&["hip", "knee", "ankle"]);
        let ctrl = names(&["ankle", "hip", "knee"]);
        let map = JointNameMap::new(&env, &ctrl).unwrap();

        let mut c = [0.0; 3];
        map.gather(&[1.0, 2.0, 3.0], &mut c);
        assert_eq!(c, [3.0, 1.0, 2.0]);

        let mut e = [0.0; 3];
        map.scatter(&c, &mut e);
        assert_eq!(e, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn random_permutations_are_bijections() {
        let mut rng = StdRng::seed_from_u64(42);
        for n in [1, 2, 7, 24] {
            let env: Vec<String> = (0..n).map(|i| format!("j{i}")).collect();
            let mut ctrl = env.clone();
            ctrl.shuffle(&mut rng);

            let map = JointNameMap::new(&env, &ctrl).unwrap();
            let mut seen = vec![false; n];
            for &i in &map.to_env {
                assert!(!seen[i]);
                seen[i] = true;
            }
            for (k, name) in ctrl.iter().enumerate() {
                assert_eq!(&env[map.to_env[k]], name);
            }
        }
    }

    #[test]
    fn mismatch_names_both_sides() {
        let env = names(&["a", "b", "c"]);
        let ctrl = names(&["a", "x", "c"]);
        assert_eq!(
            JointNameMap::new(&env, &ctrl),
            Err(JointMapErr::Mismatch {
                missing_in_env: names(&["x"]),
                missing_in_controller: names(&["b"]),
            })
        );
    }

    #[test]
    fn subsets_are_not_truncated() {
        let env = names(&["a", "b", "c"]);
        let ctrl = names(&["a", "b"]);
        let err = JointNameMap::new(&env, &ctrl).unwrap_err();
        assert!(matches!(err, JointMapErr::Mismatch { ref missing_in_controller, .. } if missing_in_controller == &names(&["c"])));
    }

    #[test]
    fn duplicates_are_rejected() {
        let env = names(&["a", "a"]);
        let ctrl = names(&["a", "b"]);
        assert_eq!(
            JointNameMap::new(&env, &ctrl),
            Err(JointMapErr::DuplicateName {
                side: "environment",
                name: "a".into(),
            })
        );
    }
}
