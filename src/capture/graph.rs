use std::collections::HashMap;

use super::{HostModel, LayerName, Module, ModuleKind};

/// A node of the `DependencyGraph`.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: LayerName,
    pub kind: ModuleKind,
    pub description: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// The module nesting of a model over its addressable layer names.
///
/// Built once per model and immutable afterwards. Children are kept in declaration order;
/// `Sequential` containers are flattened into their parent.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    roots: Vec<usize>,
    index: HashMap<LayerName, usize>,
}

impl DependencyGraph {
    /// Builds the graph by walking the module tree once.
    ///
    /// # Arguments
    /// * `modules` - The top level modules of a model.
    pub fn new(modules: &[Module]) -> Self {
        let mut graph = Self::default();
        graph.insert_all(modules, None, None);
        graph
    }

    fn insert_all(
        &mut self,
        modules: &[Module],
        prefix: Option<&LayerName>,
        parent: Option<usize>,
    ) {
        for module in modules {
            let name = match prefix {
                Some(prefix) => prefix.child(&module.name),
                None => LayerName::root(&module.name),
            };

            if !module.is_addressable() {
                self.insert_all(&module.children, Some(&name), parent);
                continue;
            }

            let id = self.nodes.len();
            self.nodes.push(GraphNode {
                name: name.clone(),
                kind: module.kind,
                description: module.describe(),
                parent,
                children: Vec::new(),
            });
            self.index.insert(name.clone(), id);

            match parent {
                Some(p) => self.nodes[p].children.push(id),
                None => self.roots.push(id),
            }

            self.insert_all(&module.children, Some(&name), Some(id));
        }
    }

    /// Whether `name` addresses a layer of the model.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&GraphNode> {
        self.index.get(name).map(|&id| &self.nodes[id])
    }

    /// The direct children of `name`, in declaration order.
    pub fn children(&self, name: &str) -> Option<impl Iterator<Item = &LayerName>> {
        let node = self.get(name)?;
        Some(node.children.iter().map(|&id| &self.nodes[id].name))
    }

    /// The top level layers, in declaration order.
    pub fn roots(&self) -> impl Iterator<Item = &LayerName> {
        self.roots.iter().map(|&id| &self.nodes[id].name)
    }

    /// Iterates over every node in preorder, which matches declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Decides which addressable layers `get_model_layers` lists.
#[derive(Debug, Clone, Copy)]
pub struct LayerFilter {
    pub exclude_norms: bool,
    pub exclude_acts: bool,
    pub exclude_pools: bool,
}

impl Default for LayerFilter {
    fn default() -> Self {
        Self {
            exclude_norms: true,
            exclude_acts: true,
            exclude_pools: true,
        }
    }
}

impl LayerFilter {
    /// A filter that lists every addressable layer.
    pub fn all() -> Self {
        Self {
            exclude_norms: false,
            exclude_acts: false,
            exclude_pools: false,
        }
    }

    fn keeps(&self, kind: ModuleKind) -> bool {
        match kind {
            ModuleKind::Normalization => !self.exclude_norms,
            ModuleKind::Activation => !self.exclude_acts,
            ModuleKind::Pooling => !self.exclude_pools,
            ModuleKind::Sequential => false,
            _ => true,
        }
    }
}

/// Gets the names of the layers of a model in the format objectives address them with.
///
/// # Arguments
/// * `model` - The model to inspect.
/// * `filter` - Which kinds of layers to leave out of the listing.
///
/// # Returns
/// The listed names in declaration order and the model's dependency graph, which holds
/// every addressable layer regardless of the filter.
pub fn get_model_layers<M>(model: &M, filter: &LayerFilter) -> (Vec<LayerName>, DependencyGraph)
where
    M: HostModel + ?Sized,
{
    let graph = DependencyGraph::new(&model.modules());
    let names = graph
        .iter()
        .filter(|node| filter.keeps(node.kind))
        .map(|node| node.name.clone())
        .collect();

    (names, graph)
}

/// Lists the layers of a model together with a description of each, for inspecting what
/// an objective can target.
///
/// # Arguments
/// * `model` - The model to inspect.
/// * `filter` - Which kinds of layers to leave out of the listing.
///
/// # Returns
/// `(name, description)` pairs in declaration order.
pub fn get_layer_repr<M>(model: &M, filter: &LayerFilter) -> Vec<(LayerName, String)>
where
    M: HostModel + ?Sized,
{
    DependencyGraph::new(&model.modules())
        .iter()
        .filter(|node| filter.keeps(node.kind))
        .map(|node| (node.name.clone(), node.description.clone()))
        .collect()
}
