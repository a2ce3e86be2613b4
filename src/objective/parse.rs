use std::str::FromStr;

use super::{Objective, channel};
use crate::{Result, VisErr};

/// Anything `render_vis` accepts as an objective.
pub trait IntoObjective {
    fn into_objective(self) -> Result<Objective>;
}

impl IntoObjective for Objective {
    fn into_objective(self) -> Result<Objective> {
        Ok(self)
    }
}

impl IntoObjective for &str {
    fn into_objective(self) -> Result<Objective> {
        self.parse()
    }
}

impl IntoObjective for String {
    fn into_objective(self) -> Result<Objective> {
        self.parse()
    }
}

impl IntoObjective for &String {
    fn into_objective(self) -> Result<Objective> {
        self.parse()
    }
}

impl FromStr for Objective {
    type Err = VisErr;

    /// Parses the `"layer:channel"` shorthand for a channel objective.
    ///
    /// The layer may itself contain `->` separators; the channel is whatever follows the
    /// last `:`.
    fn from_str(s: &str) -> Result<Self> {
        let malformed = |reason| VisErr::MalformedObjective {
            spec: s.to_string(),
            reason,
        };

        let (layer, index) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| malformed("expected \"layer:channel\""))?;

        let layer = layer.trim();
        if layer.is_empty() {
            return Err(malformed("the layer name is empty"));
        }

        let index = index
            .trim()
            .parse::<usize>()
            .map_err(|_| malformed("the channel is not a non-negative integer"))?;

        Ok(channel(layer, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Leaf, LeafKind, VisErr};

    fn leaf(objective: &Objective) -> &Leaf {
        match objective {
            Objective::Leaf(leaf) => leaf,
            other => panic!("expected a leaf, got {other}"),
        }
    }

    #[test]
    fn shorthand_resolves_to_a_channel() {
        let objective = "mixed4a->branch1->conv:476".into_objective().unwrap();
        let leaf = leaf(&objective);

        assert_eq!(leaf.layer.as_str(), "mixed4a->branch1->conv");
        assert_eq!(leaf.kind, LeafKind::Channel(476));
        assert_eq!(objective, channel("mixed4a->branch1->conv", 476));
    }

    #[test]
    fn malformed_shorthand_is_rejected() {
        for spec in ["mixed4a", ":3", "mixed4a:", "mixed4a:-1", "mixed4a:x", ""] {
            let err = spec.into_objective().unwrap_err();
            assert!(
                matches!(err, VisErr::MalformedObjective { .. }),
                "{spec}: {err}"
            );
        }
    }

    #[test]
    fn objectives_pass_through() {
        let objective = channel("conv", 1) + channel("conv", 2);
        assert_eq!(objective.clone().into_objective().unwrap(), objective);
        assert_eq!(
            String::from("conv:1").into_objective().unwrap(),
            channel("conv", 1)
        );
    }
}
