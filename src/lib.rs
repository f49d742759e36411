#[path = "core/model.rs"]
pub mod model;

#[path = "core/protocol.rs"]
pub mod protocol;

#[path = "core/grid.rs"]
pub mod grid;

#[path = "core/receptive.rs"]
pub mod receptive;

#[path = "core/session.rs"]
pub mod session;

#[path = "core/render.rs"]
pub mod render;

#[path = "core/demo.rs"]
pub mod demo;

#[path = "core/prng.rs"]
pub mod prng;
