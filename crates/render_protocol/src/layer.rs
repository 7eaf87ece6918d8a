use std::sync::Arc;

use smol_str::SmolStr;

use crate::RenderPass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerType {
    Background,
    Fill,
    Line,
    Circle,
    Symbol,
    Raster,
    Hillshade,
    ColorRelief,
    FillExtrusion,
    Heatmap,
    LocationIndicator,
    Custom,
}

impl LayerType {
    pub const fn name(self) -> &'static str {
        match self {
            LayerType::Background => "background",
            LayerType::Fill => "fill",
            LayerType::Line => "line",
            LayerType::Circle => "circle",
            LayerType::Symbol => "symbol",
            LayerType::Raster => "raster",
            LayerType::Hillshade => "hillshade",
            LayerType::ColorRelief => "color-relief",
            LayerType::FillExtrusion => "fill-extrusion",
            LayerType::Heatmap => "heatmap",
            LayerType::LocationIndicator => "location-indicator",
            LayerType::Custom => "custom",
        }
    }
}

/// Evaluated state of one style layer at the current zoom.
///
/// Produced by style evaluation and shared read-only between the renderer
/// and tile workers, hence handed around as `Arc<LayerProperties>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerProperties {
    id: SmolStr,
    layer_type: LayerType,
    render_passes: RenderPass,
    program_variant: u64,
}

impl LayerProperties {
    pub fn new(id: impl Into<SmolStr>, layer_type: LayerType, render_passes: RenderPass) -> Self {
        Self {
            id: id.into(),
            layer_type,
            render_passes,
            program_variant: 0,
        }
    }

    /// Paint-driven shader variant, e.g. data-driven vs constant color.
    pub fn with_program_variant(mut self, program_variant: u64) -> Self {
        self.program_variant = program_variant;
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn layer_type(&self) -> LayerType {
        self.layer_type
    }

    pub fn render_passes(&self) -> RenderPass {
        self.render_passes
    }

    pub fn program_variant(&self) -> u64 {
        self.program_variant
    }

    pub fn is_in_pass(&self, pass: RenderPass) -> bool {
        self.render_passes.intersects(pass)
    }
}
