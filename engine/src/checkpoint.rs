use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, ErrorKind},
    path::{Path, PathBuf},
};

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// The tag of the checkpoint written when training ends.
pub const FINAL_TAG: &str = "model_final";

const LAST_CHECKPOINT_FILE: &str = "last_checkpoint";

/// The tag of the periodic checkpoint taken at `iteration`.
pub fn checkpoint_tag(iteration: usize) -> String {
    format!("model_{iteration:07}")
}

/// Progress persisted along with every checkpoint.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationState {
    pub iteration: usize,
    /// Caller supplied values, stored next to `iteration`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IterationState {
    pub fn new(iteration: usize) -> Self {
        Self {
            iteration,
            extra: Map::new(),
        }
    }
}

/// Persists training state under a tag.
pub trait Checkpointer {
    fn save(&mut self, tag: &str, state: &IterationState) -> Result<()>;
}

/// Writes checkpoints as JSON files in a directory.
///
/// Every save also records its file name in `last_checkpoint`, which is what
/// `load_last` resumes from.
#[derive(Debug, Clone)]
pub struct FileCheckpointer {
    dir: PathBuf,
    save_to_disk: bool,
}

impl FileCheckpointer {
    /// Creates a new `FileCheckpointer`.
    ///
    /// # Arguments
    /// * `dir` - Where checkpoints are written.
    /// * `save_to_disk` - Whether this worker writes at all, only the coordinator should.
    pub fn new(dir: impl Into<PathBuf>, save_to_disk: bool) -> Self {
        Self {
            dir: dir.into(),
            save_to_disk,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn has_checkpoint(&self) -> bool {
        self.dir.join(LAST_CHECKPOINT_FILE).is_file()
    }

    /// Loads the state of the most recent checkpoint.
    ///
    /// # Returns
    /// `None` if nothing was saved in this directory yet.
    pub fn load_last(&self) -> Result<Option<IterationState>> {
        let name = match fs::read_to_string(self.dir.join(LAST_CHECKPOINT_FILE)) {
            Ok(name) => name,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let path = self.dir.join(name.trim());
        info!("loading checkpoint from {}", path.display());

        let reader = BufReader::new(File::open(path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }
}

impl Checkpointer for FileCheckpointer {
    fn save(&mut self, tag: &str, state: &IterationState) -> Result<()> {
        if !self.save_to_disk {
            return Ok(());
        }

        fs::create_dir_all(&self.dir)?;

        let name = format!("{tag}.json");
        let path = self.dir.join(&name);
        info!("saving checkpoint to {}", path.display());

        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, state)?;
        fs::write(self.dir.join(LAST_CHECKPOINT_FILE), name)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tags_are_zero_padded() {
        assert_eq!(checkpoint_tag(40), "model_0000040");
        assert_eq!(checkpoint_tag(1234567), "model_1234567");
    }

    #[test]
    fn extra_state_is_flattened() {
        let mut state = IterationState::new(80);
        state.extra.insert("epoch".into(), json!(2));

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value, json!({"iteration": 80, "epoch": 2}));

        let back: IterationState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn resumes_from_the_last_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = FileCheckpointer::new(dir.path(), true);
        assert!(!ckpt.has_checkpoint());
        assert_eq!(ckpt.load_last().unwrap(), None);

        ckpt.save(&checkpoint_tag(40), &IterationState::new(40)).unwrap();
        ckpt.save(FINAL_TAG, &IterationState::new(55)).unwrap();

        assert!(dir.path().join("model_0000040.json").is_file());
        assert!(ckpt.has_checkpoint());
        assert_eq!(ckpt.load_last().unwrap(), Some(IterationState::new(55)));
    }

    #[test]
    fn non_coordinators_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut ckpt = FileCheckpointer::new(dir.path().join("ckpt"), false);

        ckpt.save(FINAL_TAG, &IterationState::new(1)).unwrap();
        assert!(!ckpt.dir().exists());
    }
}
