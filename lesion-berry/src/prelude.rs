//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::slice::{DisplayTransform, Mirror, OverlayRenderer, SliceProjector};
pub use crate::data::window::CtWindow;
pub use crate::data::{CaseVolumes, MaskVolume, NiftiHeaderAttr, SliceKey, ViewAxis, Volume};

pub use crate::consts::gray::{MASK_BACKGROUND, MASK_LESION};

pub use crate::edit::{ApplyOutcome, ContourEditBuffer, EditMode, MaskEditApplier, Point};

pub use crate::pipeline::{
    AnalysisMode, Category, Notice, Payload, PipelineSupervisor, TaskEvent, TaskStatus,
};

pub use crate::config::ReviewConfig;
pub use crate::session::{PipelineInput, Workbench};
pub use crate::store::VolumeStore;
