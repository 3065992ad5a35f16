//! Robot description importer.
//!
//! Turns a URDF document into a validated [`RobotModel`]: the links are linked into a
//! single rooted tree, fixed joints are welded away while the welded links stay
//! reachable as named reference frames, and every moving joint gets drive gains
//! derived from a target natural frequency. The result is exposed read-only through
//! [`RobotAssembly`] to whatever authors the final scene.
//!
//! ```no_run
//! use robot_parse::{ImportConfig, Importer};
//!
//! let assembly = Importer::new(ImportConfig::default())
//!     .import_file("robots/arm", "urdf/arm.urdf")?;
//! for node in assembly.depth_first() {
//!     println!("{}", node.link);
//! }
//! # Ok::<(), robot_parse::ImportError>(())
//! ```

mod bfs;
mod spatial_inertial;
mod urdf;
mod utils;

pub mod asset;
pub mod assembly;
pub mod chain;
pub mod collapse;
pub mod config;
pub mod drive;
pub mod error;
mod extensions;
pub mod import;
pub mod model;
pub mod session;

pub use asset::{AssetLocation, AssetRef};
pub use assembly::{prim_name, RobotAssembly};
pub use chain::{build_chain, link_topology, ChainNode, KinematicChain};
pub use collapse::{collapse_fixed_joints, CollapseReport, MergedLink};
pub use config::{ImportConfig, JointOverride};
pub use drive::{effective_inertia, natural_stiffness, synthesize_drives, DriveReport};
pub use error::{
    ConfigError, EntityKind, ImportError, NotFoundError, ParseError, Result, TopologyError,
};
pub use import::Importer;
pub use model::{
    Collision, Drive, DriveTarget, DriveType, FrameSource, Geometry, Inertial, Joint, JointKind,
    Link, LoopMotion, Material, ReferenceFrame, RobotModel, Sensor, SensorKind, Visual,
};
pub use session::ImportSession;
pub use urdf::{parse_file, parse_str};
