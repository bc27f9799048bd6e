//! Layer group hierarchy
//!
//! Groups mirror the project's layer tree. Only groups below the root are
//! considered, layers outside the published set are dropped, and groups left
//! without members disappear.

use serde::Serialize;
use std::collections::HashSet;

use crate::layers::{LayerTreeGroup, LayerTreeNode};

/// Named, ordered group of published layers and nested groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerGroup {
    pub name: String,
    pub layers: Vec<GroupMember>,
}

/// Member of a [`LayerGroup`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum GroupMember {
    Layer(String),
    Group(LayerGroup),
}

impl LayerGroup {
    /// Layer names in this group and its subgroups, depth first
    pub fn layer_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for member in &self.layers {
            match member {
                GroupMember::Layer(name) => names.push(name.as_str()),
                GroupMember::Group(group) => names.extend(group.layer_names()),
            }
        }
        names
    }
}

fn build_group(tree: &LayerTreeGroup, published: &HashSet<&str>) -> Option<LayerGroup> {
    let layers: Vec<GroupMember> = tree
        .children
        .iter()
        .filter_map(|child| match child {
            LayerTreeNode::Layer(name) if published.contains(name.as_str()) => {
                Some(GroupMember::Layer(name.clone()))
            }
            LayerTreeNode::Layer(_) => None,
            LayerTreeNode::Group(group) => build_group(group, published).map(GroupMember::Group),
        })
        .collect();

    if layers.is_empty() {
        None
    } else {
        Some(LayerGroup {
            name: tree.name.clone(),
            layers,
        })
    }
}

/// Groups of the tree below `root` that contain at least one published layer
///
/// Layers placed directly under the root belong to no group.
pub fn layer_groups<S: AsRef<str>>(root: &LayerTreeGroup, published: &[S]) -> Vec<LayerGroup> {
    let published: HashSet<&str> = published.iter().map(|name| name.as_ref()).collect();
    root.children
        .iter()
        .filter_map(|child| match child {
            LayerTreeNode::Group(group) => build_group(group, &published),
            LayerTreeNode::Layer(_) => None,
        })
        .collect()
}
