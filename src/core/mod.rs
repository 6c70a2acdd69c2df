// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Core module - event model, event bus and the pipeline engine

mod callbacks;
mod engine;
mod event;
mod event_bus;

pub use callbacks::{Callback, Callbacks};
pub use engine::{Engine, PipelineHandle, PipelineHealth, PipelineSnapshot, FUSION_SOURCE};
pub use event::{clamp_confidence, Details, PluginCategory, PluginMetadata, StateEvent, Status};
pub use event_bus::EventBus;
