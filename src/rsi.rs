use std::fs;
use std::path::Path;

use eyre::WrapErr;
use image::ImageFormat;

use crate::meta::{Meta, Size, StateMeta, MAXIMUM_RSI_VERSION, MINIMUM_RSI_VERSION};
use crate::{full_state_name, Dmi, Frame, State};

const META_FILE: &str = "meta.json";

/// Selector given to DMI movement states, so they sit next to the still state of
/// the same name.
pub const MOVEMENT_SELECTOR: &str = "movement";

/// A Robust Station Image: a directory with `meta.json` and one PNG sheet per state.
#[derive(Debug, Clone)]
pub struct Rsi {
    size: (u32, u32),
    license: Option<String>,
    copyright: Option<String>,
    states: Vec<State>,
}

impl Rsi {
    pub fn new(size: (u32, u32)) -> Self {
        Self {
            size,
            license: None,
            copyright: None,
            states: Vec::new(),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn license(&self) -> Option<&str> {
        self.license.as_deref()
    }

    pub fn set_license(&mut self, license: Option<String>) {
        self.license = license;
    }

    pub fn copyright(&self) -> Option<&str> {
        self.copyright.as_deref()
    }

    pub fn set_copyright(&mut self, copyright: Option<String>) {
        self.copyright = copyright;
    }

    /// States in insertion order.
    pub fn states(&self) -> &[State] {
        &self.states
    }

    /// Gets a state by name, without selectors.
    pub fn get(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|state| state.full_name() == name)
    }

    pub fn get_select(&self, name: &str, select: &[String]) -> Option<&State> {
        self.get(&full_state_name(name, select))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut State> {
        self.states.iter_mut().find(|state| state.full_name() == name)
    }

    pub fn get_select_mut(&mut self, name: &str, select: &[String]) -> Option<&mut State> {
        self.get_mut(&full_state_name(name, select))
    }

    /// Adds a state, replacing any state with the same full name in place.
    ///
    /// Returns the replaced state.
    pub fn add_state(&mut self, state: State) -> Option<State> {
        self.insert(state).1
    }

    /// Makes an empty state sized for this RSI and adds it.
    pub fn new_state(&mut self, name: &str, select: &[String], directions: u8) -> &mut State {
        let state = State::new(name, select, self.size, directions);
        let (index, _) = self.insert(state);
        &mut self.states[index]
    }

    fn insert(&mut self, state: State) -> (usize, Option<State>) {
        match self
            .states
            .iter()
            .position(|existing| existing.full_name() == state.full_name())
        {
            Some(index) => (index, Some(std::mem::replace(&mut self.states[index], state))),
            None => {
                self.states.push(state);
                (self.states.len() - 1, None)
            }
        }
    }
}

impl Rsi {
    /// Loads a BYOND DMI file and converts it.
    pub fn from_dmi(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();

        let dmi = Dmi::open(path)?;
        log::info!("loaded {} states from {}", dmi.states.len(), path.display());

        Self::convert_dmi(&dmi)
    }

    /// Regroups the DMI's frame-major icons by direction and converts delays from
    /// ticks to seconds.
    pub fn convert_dmi(dmi: &Dmi) -> eyre::Result<Self> {
        let mut rsi = Self::new((dmi.width, dmi.height));

        for dmi_state in &dmi.states {
            let selectors = if dmi_state.movement {
                vec![MOVEMENT_SELECTOR.to_owned()]
            } else {
                Vec::new()
            };
            let mut state = State::new(&dmi_state.name, &selectors, rsi.size, dmi_state.dirs);

            let flags = state.flags_mut();
            if dmi_state.loop_count != 0 {
                flags.insert("loop".to_owned(), dmi_state.loop_count.into());
            }
            if dmi_state.rewind {
                flags.insert("rewind".to_owned(), true.into());
            }
            if dmi_state.movement {
                flags.insert("movement".to_owned(), true.into());
            }
            if let Some(hotspot) = dmi_state.hotspot {
                flags.insert("hotspot".to_owned(), serde_json::json!(hotspot));
            }

            for dir in 0..dmi_state.dirs {
                for frame in 0..dmi_state.frames {
                    let image = dmi_state.icon(dir, frame).cloned().ok_or_else(|| {
                        eyre::eyre!(
                            "state {:?} has no icon for direction {} frame {}",
                            dmi_state.name,
                            dir,
                            frame
                        )
                    })?;
                    let delay = dmi_state.delay(frame) / 10.0;
                    state.push_frame(dir, Frame { image, delay })?;
                }
            }

            log::debug!(
                "state {:?}: {} directions, {} frames",
                dmi_state.name,
                dmi_state.dirs,
                dmi_state.frames
            );
            if let Some(replaced) = rsi.add_state(state) {
                log::warn!(
                    "duplicate state {:?}, keeping the last one",
                    replaced.full_name()
                );
            }
        }

        Ok(rsi)
    }

    /// Opens an RSI directory.
    pub fn open(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();

        let meta_path = path.join(META_FILE);
        let buf = fs::read(&meta_path).wrap_err_with(|| format!("failed to read {}", meta_path.display()))?;
        let meta: Meta = serde_json::from_slice(&buf)
            .wrap_err_with(|| format!("invalid metadata in {}", meta_path.display()))?;

        eyre::ensure!(
            (MINIMUM_RSI_VERSION..=MAXIMUM_RSI_VERSION).contains(&meta.version),
            "unsupported RSI version {}",
            meta.version
        );
        eyre::ensure!(
            meta.size.x > 0 && meta.size.y > 0,
            "RSI size must be non-zero"
        );

        let size = (meta.size.x, meta.size.y);
        let mut rsi = Self {
            size,
            license: meta.license,
            copyright: meta.copyright,
            states: Vec::with_capacity(meta.states.len()),
        };

        for state_meta in &meta.states {
            let sheet_path = path.join(sheet_file_name(&full_state_name(
                &state_meta.name,
                &state_meta.select,
            )));
            let sheet = image::open(&sheet_path)
                .wrap_err_with(|| format!("failed to open {}", sheet_path.display()))?
                .to_rgba8();
            rsi.add_state(State::from_sheet(state_meta, &sheet, size)?);
        }

        Ok(rsi)
    }

    /// Writes the RSI directory at `path`.
    ///
    /// Everything is staged in a sibling directory and swapped in at the end, so a
    /// failure leaves any previous RSI at `path` untouched. An existing RSI is
    /// replaced; its files that the new RSI does not write are carried over.
    pub fn write(&self, path: impl AsRef<Path>) -> eyre::Result<()> {
        let path = path.as_ref();

        eyre::ensure!(
            !path.exists() || path.is_dir(),
            "{} exists and is not a directory",
            path.display()
        );

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut builder = tempfile::Builder::new();
        builder.prefix(".rsi-");
        // mkdir applies the umask to this
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(fs::Permissions::from_mode(0o777));
        }
        let staging = builder
            .tempdir_in(parent)
            .wrap_err_with(|| format!("failed to create a directory in {}", parent.display()))?;

        self.write_contents(staging.path())?;

        if path.is_dir() {
            carry_over_files(path, staging.path())?;
            swap_dir(path, staging.path(), parent)?;
        } else {
            fs::rename(staging.path(), path)
                .wrap_err_with(|| format!("failed to move RSI into {}", path.display()))?;
        }

        log::info!("wrote {} states to {}", self.states.len(), path.display());

        Ok(())
    }

    fn write_contents(&self, dir: &Path) -> eyre::Result<()> {
        let mut states = Vec::with_capacity(self.states.len());

        for state in &self.states {
            eyre::ensure!(
                state.size() == self.size,
                "state {:?} is {:?}, expected {:?}",
                state.full_name(),
                state.size(),
                self.size
            );

            let sheet_path = dir.join(sheet_file_name(state.full_name()));
            state
                .to_sheet()?
                .save_with_format(&sheet_path, ImageFormat::Png)
                .wrap_err_with(|| format!("failed to write {}", sheet_path.display()))?;

            states.push(StateMeta {
                name: state.name().to_owned(),
                select: state.selectors().to_vec(),
                flags: state.flags().clone(),
                directions: state.directions(),
                delays: Some(state.delays()),
            });
        }

        let meta = Meta {
            version: MAXIMUM_RSI_VERSION,
            size: Size {
                x: self.size.0,
                y: self.size.1,
            },
            license: self.license.clone(),
            copyright: self.copyright.clone(),
            states,
        };
        fs::write(dir.join(META_FILE), serde_json::to_string_pretty(&meta)?)?;

        Ok(())
    }
}

/// Copies files of `existing` that `staging` does not already hold.
fn carry_over_files(existing: &Path, staging: &Path) -> eyre::Result<()> {
    for entry in fs::read_dir(existing)? {
        let entry = entry?;
        eyre::ensure!(
            entry.file_type()?.is_file(),
            "cannot replace {}: {} is not a regular file",
            existing.display(),
            entry.path().display()
        );

        let target = staging.join(entry.file_name());
        if !target.exists() {
            fs::copy(entry.path(), &target)
                .wrap_err_with(|| format!("failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Replaces the directory at `path` with `staging`, putting the old one back if that fails.
fn swap_dir(path: &Path, staging: &Path, parent: &Path) -> eyre::Result<()> {
    let backup = tempfile::Builder::new()
        .prefix(".rsi-old-")
        .tempdir_in(parent)
        .wrap_err_with(|| format!("failed to create a directory in {}", parent.display()))?;
    fs::rename(path, backup.path())
        .wrap_err_with(|| format!("failed to move {} aside", path.display()))?;

    if let Err(err) = fs::rename(staging, path) {
        fs::rename(backup.path(), path)
            .wrap_err_with(|| format!("failed to restore {}", path.display()))?;
        return Err(eyre::Report::new(err)
            .wrap_err(format!("failed to move RSI into {}", path.display())));
    }

    Ok(())
}

fn sheet_file_name(full_name: &str) -> String {
    format!("{}.png", full_name)
}
