pub mod item;
pub mod stage;

pub use item::{Item, ItemId};
pub use stage::{InvalidStage, Stage, StageSet};
