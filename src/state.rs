use image::{imageops, GenericImage, RgbaImage};

use crate::meta::{Flags, StateMeta};

/// One icon of an animation and how long it stays on screen, in seconds.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,
    pub delay: f32,
}

/// A named animation inside an RSI, with one frame list per direction.
#[derive(Debug, Clone)]
pub struct State {
    name: String,
    full_name: String,
    selectors: Vec<String>,
    flags: Flags,

    size: (u32, u32),
    directions: u8,

    icons: Vec<Vec<Frame>>,
}

/// Turns a name and selectors into a full state name like `wrench+m`.
///
/// The full name doubles as the sheet's file stem.
pub fn full_state_name(name: &str, selectors: &[String]) -> String {
    let mut full_name = name.to_owned();
    for selector in selectors {
        full_name.push('+');
        full_name.push_str(selector);
    }
    full_name
}

impl State {
    pub fn new(name: &str, selectors: &[String], size: (u32, u32), directions: u8) -> Self {
        Self {
            name: name.to_owned(),
            full_name: full_state_name(name, selectors),
            selectors: selectors.to_vec(),
            flags: Flags::new(),
            size,
            directions,
            icons: vec![Vec::new(); usize::from(directions)],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn selectors(&self) -> &[String] {
        &self.selectors
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn flags_mut(&mut self) -> &mut Flags {
        &mut self.flags
    }

    /// Dimensions of every icon in this state.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn directions(&self) -> u8 {
        self.directions
    }

    /// Frames of `direction`, empty if the direction does not exist.
    pub fn frames(&self, direction: u8) -> &[Frame] {
        self.icons
            .get(usize::from(direction))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn icon(&self, direction: u8, index: usize) -> Option<&RgbaImage> {
        self.frames(direction).get(index).map(|frame| &frame.image)
    }

    pub fn delay(&self, direction: u8, index: usize) -> Option<f32> {
        self.frames(direction).get(index).map(|frame| frame.delay)
    }

    pub fn delays(&self) -> Vec<Vec<f32>> {
        self.icons
            .iter()
            .map(|frames| frames.iter().map(|frame| frame.delay).collect())
            .collect()
    }

    pub fn push_frame(&mut self, direction: u8, frame: Frame) -> eyre::Result<()> {
        eyre::ensure!(
            frame.image.dimensions() == self.size,
            "frame of state {:?} is {:?}, expected {:?}",
            self.full_name,
            frame.image.dimensions(),
            self.size
        );

        let (full_name, directions) = (&self.full_name, self.directions);
        let frames = self.icons.get_mut(usize::from(direction)).ok_or_else(|| {
            eyre::eyre!(
                "direction {} out of range for state {:?} with {} directions",
                direction,
                full_name,
                directions
            )
        })?;
        frames.push(frame);

        Ok(())
    }

    /// Packs every frame, direction by direction, into a sheet `ceil(sqrt(n))` icons wide.
    pub(crate) fn to_sheet(&self) -> eyre::Result<RgbaImage> {
        let (width, height) = self.size;
        let frames: Vec<&Frame> = self.icons.iter().flatten().collect();

        let columns = sheet_columns(frames.len());
        let rows = ((frames.len() + columns - 1) / columns).max(1);

        let mut sheet = RgbaImage::new(columns as u32 * width, rows as u32 * height);
        for (index, frame) in frames.iter().enumerate() {
            let x = (index % columns) as u32 * width;
            let y = (index / columns) as u32 * height;
            sheet.copy_from(&frame.image, x, y)?;
        }

        Ok(sheet)
    }

    pub(crate) fn from_sheet(meta: &StateMeta, sheet: &RgbaImage, size: (u32, u32)) -> eyre::Result<Self> {
        let mut state = Self::new(&meta.name, &meta.select, size, meta.directions);
        state.flags = meta.flags.clone();

        let delays = match &meta.delays {
            Some(delays) => {
                eyre::ensure!(
                    delays.len() == usize::from(meta.directions),
                    "state {:?} has {} delay lists for {} directions",
                    state.full_name,
                    delays.len(),
                    meta.directions
                );
                delays.clone()
            }
            None => vec![vec![0.0]; usize::from(meta.directions)],
        };

        let (width, height) = size;
        let columns = sheet.width() / width;
        let available = columns as usize * (sheet.height() / height) as usize;
        let needed: usize = delays.iter().map(Vec::len).sum();
        eyre::ensure!(
            needed <= available,
            "sheet of state {:?} holds {} icons but {} are declared",
            state.full_name,
            available,
            needed
        );

        let mut index = 0;
        for (frames, delays) in state.icons.iter_mut().zip(delays) {
            for delay in delays {
                let x = (index % columns) * width;
                let y = (index / columns) * height;
                let image = imageops::crop_imm(sheet, x, y, width, height).to_image();
                frames.push(Frame { image, delay });
                index += 1;
            }
        }

        Ok(state)
    }
}

fn sheet_columns(count: usize) -> usize {
    let mut columns = 1;
    while columns * columns < count {
        columns += 1;
    }
    columns
}
