//! The import pipeline: parse, build the chain, collapse, synthesize drives, assemble.

use std::path::Path;

use tracing::info;

use crate::assembly::RobotAssembly;
use crate::chain::{build_chain, KinematicChain};
use crate::collapse::collapse_fixed_joints;
use crate::config::ImportConfig;
use crate::drive::synthesize_drives;
use crate::error::Result;
use crate::model::{Collision, RobotModel};
use crate::session::ImportSession;
use crate::urdf::{parse_file, parse_str};

/// Runs every stage of an import with one configuration.
#[derive(Debug, Clone, Default)]
pub struct Importer {
    config: ImportConfig,
}

impl Importer {
    pub fn new(config: ImportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn import_str(&self, xml: &str) -> Result<RobotAssembly> {
        self.config.validate()?;
        let model = parse_str(xml, &self.config)?;
        self.finish(model)
    }

    pub fn import_file(
        &self,
        asset_root: impl AsRef<Path>,
        relative_path: impl AsRef<Path>,
    ) -> Result<RobotAssembly> {
        self.config.validate()?;
        let model = parse_file(asset_root, relative_path, &self.config)?;
        self.finish(model)
    }

    fn finish(&self, mut model: RobotModel) -> Result<RobotAssembly> {
        let mut session = ImportSession::new(self.config.clone());

        build_chain(&mut model)?;
        let report = collapse_fixed_joints(&mut model, &self.config)?;
        for warning in report.warnings {
            session.warn(warning);
        }
        let chain = KinematicChain::from_model(&model)?;

        if self.config.collision_from_visual {
            collision_from_visual(&mut model);
        }

        let drives = synthesize_drives(&mut model, &self.config)?;
        for error in drives.errors {
            session.record_config_error(error);
        }

        session.register_meshes(&model);
        info!(
            "imported '{}': {} links, {} joints, {} driven",
            model.name,
            model.links.len(),
            model.joints.len(),
            drives.driven
        );
        Ok(RobotAssembly::new(model, chain, session))
    }
}

/// Give links that only have visuals the same shapes as collisions.
pub fn collision_from_visual(model: &mut RobotModel) {
    for link in model.links.values_mut() {
        if link.collisions.is_empty() && !link.visuals.is_empty() {
            link.collisions = link.visuals.iter().map(Collision::from).collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use approx::assert_relative_eq;

    use super::*;
    use crate::error::{ImportError, ParseError, TopologyError};
    use crate::model::{DriveTarget, JointKind};

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` with a subscriber writing into a buffer, return its result and the log.
    fn with_log<T>(f: impl FnOnce() -> T) -> (T, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        let log = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
        (out, log)
    }

    #[test]
    fn test_basic_end_to_end() {
        let assembly = Importer::default()
            .import_file("./urdf/tests", "test_basic.urdf")
            .unwrap();

        assert_eq!(assembly.root_link(), "base_link");
        assert_eq!(assembly.merged_links("base_link").unwrap(), vec!["root_link"]);
        assert_relative_eq!(assembly.link("base_link").unwrap().mass(), 10.0);
        assert_eq!(assembly.session().warnings().len(), 1);
        assert!(assembly.session().config_errors().is_empty());
        assert_eq!(assembly.anchor().unwrap().link, "base_link");

        assert!(assembly
            .model()
            .tree_joints()
            .all(|j| j.kind != JointKind::Fixed));
        let elbow = assembly.joint("elbow_joint").unwrap();
        let drive = elbow.drive.as_ref().unwrap();
        assert_eq!(drive.target, Some(DriveTarget::Position));
        assert!(drive.strength > 0.0);

        assert_eq!(assembly.chain().len(), assembly.model().links.len());
        assert_eq!(assembly.session().meshes().len(), 1);
    }

    #[test]
    fn collisions_from_visuals() {
        let config = ImportConfig::default().with_collision_from_visual(true);
        let assembly = Importer::new(config)
            .import_file("./urdf/tests", "test_basic.urdf")
            .unwrap();
        // link_1 only had a visual
        assert_eq!(assembly.link("link_1").unwrap().collisions.len(), 1);
        // base_link had its own collision and no visual
        assert_eq!(assembly.link("base_link").unwrap().collisions.len(), 1);
    }

    #[test]
    fn topology_errors_abort() {
        let xml = r#"<robot name="r">
  <link name="a"/><link name="b"/>
  <joint name="j" type="fixed"><parent link="a"/><child link="ghost"/></joint>
</robot>"#;
        let err = Importer::default().import_str(xml).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Topology(TopologyError::UndefinedLink { .. })
        ));
    }

    #[test]
    fn topology_errors_are_logged() {
        let xml = r#"<robot name="r">
  <link name="a"/><link name="b"/>
  <joint name="j" type="fixed"><parent link="a"/><child link="ghost"/></joint>
</robot>"#;
        let (result, log) = with_log(|| Importer::default().import_str(xml));
        assert!(result.is_err());
        assert!(log.contains("ERROR"));
        assert!(log.contains("joint 'j' references undefined link 'ghost'"));
    }

    #[test]
    fn parse_errors_are_logged() {
        let xml = r#"<robot name="r"><link name="a"/><link name="a"/></robot>"#;
        let (result, log) = with_log(|| Importer::default().import_str(xml));
        assert!(matches!(
            result,
            Err(ImportError::Parse(ParseError::DuplicateLink(_)))
        ));
        assert!(log.contains("ERROR"));
        assert!(log.contains("duplicate link name: a"));

        let (result, log) =
            with_log(|| Importer::default().import_file("./urdf/tests", "missing.urdf"));
        assert!(matches!(result, Err(ImportError::Parse(ParseError::Io(_)))));
        assert!(log.contains("robot description rejected"));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let err = Importer::new(ImportConfig::default().with_density(-2.0))
            .import_str("<robot name=\"r\"><link name=\"a\"/></robot>")
            .unwrap_err();
        assert!(matches!(err, ImportError::Config(_)));
    }

    #[test]
    fn bad_drive_globals_only_zero_drives() {
        let config = ImportConfig::default().with_natural_frequency(f64::NAN);
        let assembly = Importer::new(config)
            .import_file("./urdf/tests", "test_basic.urdf")
            .unwrap();
        assert!(!assembly.session().config_errors().is_empty());
        let drive = assembly.joint("elbow_joint").unwrap().drive.as_ref().unwrap();
        assert_eq!(drive.target, None);
        assert_eq!(drive.strength, 0.0);
    }

    #[test]
    fn single_link_robot() {
        let assembly = Importer::default()
            .import_str("<robot name=\"r\"><link name=\"a\"/></robot>")
            .unwrap();
        assert_eq!(assembly.root_link(), "a");
        assert_eq!(assembly.chain().len(), 1);
    }
}
