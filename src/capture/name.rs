use std::{borrow::Borrow, convert::Infallible, fmt, str::FromStr};

/// A hierarchical layer identifier: the chain of module names from the root of the
/// model down to the layer, joined by [`LayerName::DELIMITER`].
///
/// ```
/// use optvis::LayerName;
///
/// let name = LayerName::root("mixed4a").child("branch1").child("conv");
/// assert_eq!(name.to_string(), "mixed4a->branch1->conv");
/// assert_eq!(name.depth(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerName(String);

impl LayerName {
    /// The separator between a parent module's name and its child's.
    pub const DELIMITER: &'static str = "->";

    /// Creates a top level name.
    pub fn root(segment: &str) -> Self {
        Self(segment.to_string())
    }

    /// Creates a name by joining `segments` with the delimiter.
    pub fn from_segments<'a, I>(segments: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let segments: Vec<&str> = segments.into_iter().collect();
        Self(segments.join(Self::DELIMITER))
    }

    /// Returns the name of a child module nested under this one.
    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}{}{segment}", self.0, Self::DELIMITER))
    }

    /// Returns the name of the enclosing module, if any.
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once(Self::DELIMITER)
            .map(|(parent, _)| Self(parent.to_string()))
    }

    /// The nesting depth, that is, the amount of delimiters in the name.
    pub fn depth(&self) -> usize {
        self.0.matches(Self::DELIMITER).count()
    }

    /// Iterates over the module names along the chain.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(Self::DELIMITER)
    }

    /// The innermost module name.
    pub fn leaf(&self) -> &str {
        self.segments().last().unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LayerName {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for LayerName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for LayerName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for LayerName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Keeps only the names whose nesting depth is at most `depth`.
///
/// # Arguments
/// * `names` - The layer names, usually as returned by `get_model_layers`.
/// * `depth` - The maximum amount of delimiters a kept name may have.
///
/// # Returns
/// The kept names in their original order.
pub fn filter_layer_names<'a, I>(names: I, depth: usize) -> Vec<LayerName>
where
    I: IntoIterator<Item = &'a LayerName>,
{
    names
        .into_iter()
        .filter(|name| name.depth() <= depth)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_and_parent() {
        let name: LayerName = "mixed4a->branch1->conv".parse().unwrap();

        assert_eq!(
            name.segments().collect::<Vec<_>>(),
            ["mixed4a", "branch1", "conv"]
        );
        assert_eq!(name.leaf(), "conv");
        assert_eq!(name.parent(), Some(LayerName::from("mixed4a->branch1")));
        assert_eq!(LayerName::root("conv1").parent(), None);
    }

    #[test]
    fn from_segments_matches_child_chain() {
        let a = LayerName::from_segments(["a", "b", "c"]);
        let b = LayerName::root("a").child("b").child("c");
        assert_eq!(a, b);
        assert_eq!(a.depth(), 2);
    }

    #[test]
    fn filter_by_depth() {
        let names: Vec<LayerName> = [
            "conv1",
            "mixed3a",
            "mixed3a->branch1",
            "mixed3a->branch1->conv",
        ]
        .into_iter()
        .map(LayerName::from)
        .collect();

        let top = filter_layer_names(&names, 0);
        assert_eq!(top, [LayerName::from("conv1"), LayerName::from("mixed3a")]);

        let two = filter_layer_names(&names, 1);
        assert_eq!(two.len(), 3);

        let all = filter_layer_names(&names, 8);
        assert_eq!(all, names);
    }
}
