//! Persistent button and focus metadata
//!
//! Every PTZ camera has a fixed grid of memory buttons. A button carries a
//! display name and style class for the control frontend, and the focus value
//! read from the camera when its position was saved.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_BUTTON_CLASS: &str = "btn-secondary";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store format error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no button {pos} for camera {cam}")]
    UnknownPosition { cam: usize, pos: u8 },
}

/// One memory button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonRecord {
    pub cam: usize,
    pub pos: u8,
    pub name: String,
    pub btn_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<u16>,
}

impl ButtonRecord {
    fn empty(cam: usize, pos: u8) -> Self {
        Self {
            cam,
            pos,
            name: String::new(),
            btn_class: DEFAULT_BUTTON_CLASS.to_string(),
            focus: None,
        }
    }
}

/// Storage used by the save and recall flows
pub trait PositionStore: Send + Sync {
    /// Focus saved with a position, `None` if it was never saved
    fn stored_focus(&self, cam: usize, pos: u8) -> Result<Option<u16>, StoreError>;

    fn set_stored_focus(&self, cam: usize, pos: u8, focus: u16) -> Result<(), StoreError>;

    fn set_button(&self, cam: usize, pos: u8, name: &str, btn_class: &str)
        -> Result<(), StoreError>;

    /// All buttons ordered by camera, then position
    fn buttons(&self) -> Vec<ButtonRecord>;

    /// Resets names and classes; stored focus values are kept
    fn clear_buttons(&self) -> Result<(), StoreError>;
}

/// JSON file backed store; the whole grid is rewritten on every change
pub struct JsonPositionStore {
    path: PathBuf,
    records: Mutex<Vec<ButtonRecord>>,
    buttons: u8,
}

impl JsonPositionStore {
    /// Opens the store at `path`, creating the grid for `cameras` x `buttons` if missing
    pub fn open<P: AsRef<Path>>(path: P, cameras: usize, buttons: u8) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let loaded: Vec<ButtonRecord> = serde_json::from_str(&content)?;
            Self::fit_grid(loaded, cameras, buttons)
        } else {
            info!(path = %path.display(), "Initialize position store");
            Self::fit_grid(Vec::new(), cameras, buttons)
        };

        let store = Self {
            path,
            records: Mutex::new(records),
            buttons,
        };
        store.persist(&store.records.lock())?;
        Ok(store)
    }

    /// Keeps loaded records that fit the configured grid and fills the gaps
    fn fit_grid(loaded: Vec<ButtonRecord>, cameras: usize, buttons: u8) -> Vec<ButtonRecord> {
        let mut records: Vec<ButtonRecord> = (0..cameras)
            .flat_map(|cam| (0..buttons).map(move |pos| ButtonRecord::empty(cam, pos)))
            .collect();

        for record in loaded {
            if record.cam < cameras && record.pos < buttons {
                let index = record.cam * buttons as usize + record.pos as usize;
                records[index] = record;
            }
        }
        records
    }

    fn index(&self, cam: usize, pos: u8, len: usize) -> Result<usize, StoreError> {
        let index = cam * self.buttons as usize + pos as usize;
        if pos >= self.buttons || index >= len {
            return Err(StoreError::UnknownPosition { cam, pos });
        }
        Ok(index)
    }

    fn persist(&self, records: &[ButtonRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, cam: usize, pos: u8, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut ButtonRecord),
    {
        let mut records = self.records.lock();
        let index = self.index(cam, pos, records.len())?;
        change(&mut records[index]);
        self.persist(&records)
    }
}

impl PositionStore for JsonPositionStore {
    fn stored_focus(&self, cam: usize, pos: u8) -> Result<Option<u16>, StoreError> {
        let records = self.records.lock();
        let index = self.index(cam, pos, records.len())?;
        Ok(records[index].focus)
    }

    fn set_stored_focus(&self, cam: usize, pos: u8, focus: u16) -> Result<(), StoreError> {
        self.update(cam, pos, |record| record.focus = Some(focus))
    }

    fn set_button(
        &self,
        cam: usize,
        pos: u8,
        name: &str,
        btn_class: &str,
    ) -> Result<(), StoreError> {
        self.update(cam, pos, |record| {
            record.name = name.to_string();
            record.btn_class = btn_class.to_string();
        })
    }

    fn buttons(&self) -> Vec<ButtonRecord> {
        self.records.lock().clone()
    }

    fn clear_buttons(&self) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        for record in records.iter_mut() {
            record.name.clear();
            record.btn_class = DEFAULT_BUTTON_CLASS.to_string();
        }
        self.persist(&records)
    }
}
