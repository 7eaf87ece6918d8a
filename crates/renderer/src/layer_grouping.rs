//! Partitioning of ordered style layers into runs that share one program.
//!
//! Grouping never reorders: paint order decides what draws on top, so each
//! batch is a contiguous range of the input.

use std::ops::Range;
use std::sync::Arc;

use render_protocol::{LayerProperties, LayerType, RenderPass};

/// A run of consecutive layers with the same type, render passes and
/// program variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerBatch {
    pub layer_type: LayerType,
    pub render_passes: RenderPass,
    pub program_variant: u64,
    /// Indices into the grouped slice.
    pub range: Range<usize>,
}

impl LayerBatch {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn indices(&self) -> Range<usize> {
        self.range.clone()
    }

    /// The batch's layers out of the slice it was grouped from.
    pub fn layers<'a>(&self, layers: &'a [Arc<LayerProperties>]) -> &'a [Arc<LayerProperties>] {
        &layers[self.range.clone()]
    }
}

/// Splits `items` into the fewest contiguous ranges whose elements share a
/// key. One linear scan, no reordering.
pub fn group_layers_by<T, K: PartialEq>(
    items: &[T],
    mut key: impl FnMut(&T) -> K,
) -> Vec<(K, Range<usize>)> {
    let mut groups: Vec<(K, Range<usize>)> = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let item_key = key(item);
        match groups.last_mut() {
            Some((running, range)) if *running == item_key => range.end = index + 1,
            _ => groups.push((item_key, index..index + 1)),
        }
    }
    groups
}

/// Groups style-ordered layers by `(layer type, render passes, program
/// variant)`, the fields that decide whether two layers share a program.
pub fn group_layers(layers: &[Arc<LayerProperties>]) -> Vec<LayerBatch> {
    let batches: Vec<LayerBatch> = group_layers_by(layers, |layer| {
        (layer.layer_type(), layer.render_passes(), layer.program_variant())
    })
    .into_iter()
    .map(|((layer_type, render_passes, program_variant), range)| LayerBatch {
        layer_type,
        render_passes,
        program_variant,
        range,
    })
    .collect();
    log::trace!("grouped {} layers into {} batches", layers.len(), batches.len());
    batches
}
