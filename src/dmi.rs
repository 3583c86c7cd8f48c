use std::path::Path;
use std::str::FromStr;

use eyre::WrapErr;
use image::{imageops, ImageFormat, RgbaImage};

/// Keyword of the PNG text chunk BYOND stores the icon metadata in.
const DESCRIPTION_KEYWORD: &str = "Description";

const BEGIN_MARKER: &str = "# BEGIN DMI";
const END_MARKER: &str = "# END DMI";

/// Icon size BYOND assumes when the header leaves it out.
const DEFAULT_ICON_SIZE: u32 = 32;

/// A BYOND icon file: one PNG sheet holding every icon, plus the metadata that
/// says which icons belong to which state.
#[derive(Debug)]
pub struct Dmi {
    pub version: String,
    pub width: u32,
    pub height: u32,
    pub states: Vec<DmiState>,
}

#[derive(Debug)]
pub struct DmiState {
    pub name: String,
    pub dirs: u8,
    pub frames: u32,
    /// Per-frame delays in ticks (1/10 s).
    pub delays: Vec<f32>,
    pub loop_count: u32,
    pub rewind: bool,
    pub movement: bool,
    pub hotspot: Option<[u32; 3]>,
    /// Icons in sheet order: all directions of frame 0, then frame 1, ...
    pub icons: Vec<RgbaImage>,
}

impl DmiState {
    fn new(name: String) -> Self {
        Self {
            name,
            dirs: 1,
            frames: 1,
            delays: Vec::new(),
            loop_count: 0,
            rewind: false,
            movement: false,
            hotspot: None,
            icons: Vec::new(),
        }
    }

    pub fn icon_count(&self) -> usize {
        usize::from(self.dirs) * self.frames as usize
    }

    pub fn icon(&self, dir: u8, frame: u32) -> Option<&RgbaImage> {
        if dir >= self.dirs || frame >= self.frames {
            return None;
        }
        self.icons
            .get(frame as usize * usize::from(self.dirs) + usize::from(dir))
    }

    /// Delay of `frame` in ticks. Frames without an explicit delay last one tick.
    pub fn delay(&self, frame: u32) -> f32 {
        self.delays.get(frame as usize).copied().unwrap_or(1.0)
    }

    fn set(&mut self, key: &str, value: &str) -> eyre::Result<()> {
        match key {
            "dirs" => {
                let dirs = parse_number(key, value)?;
                eyre::ensure!(
                    matches!(dirs, 1 | 4 | 8),
                    "state {:?} has {} directions, expected 1, 4 or 8",
                    self.name,
                    dirs
                );
                self.dirs = dirs;
            }
            "frames" => self.frames = parse_number(key, value)?,
            "delay" => {
                self.delays = value
                    .split(',')
                    .map(|delay| parse_number(key, delay))
                    .collect::<eyre::Result<_>>()?;
            }
            "loop" => self.loop_count = parse_number(key, value)?,
            "rewind" => self.rewind = parse_number::<u32>(key, value)? != 0,
            "movement" => self.movement = parse_number::<u32>(key, value)? != 0,
            "hotspot" => {
                let coords = value
                    .split(',')
                    .map(|coord| parse_number(key, coord))
                    .collect::<eyre::Result<Vec<u32>>>()?;
                eyre::ensure!(coords.len() == 3, "hotspot must be `x,y,frame`: {}", value);
                self.hotspot = Some([coords[0], coords[1], coords[2]]);
            }
            _ => log::debug!("ignoring state key `{}` in {:?}", key, self.name),
        }
        Ok(())
    }
}

impl Dmi {
    pub fn open(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();

        let buf = std::fs::read(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;

        Self::from_bytes(buf).wrap_err_with(|| format!("{} is not a valid DMI", path.display()))
    }

    pub fn from_bytes(buf: impl AsRef<[u8]>) -> eyre::Result<Self> {
        let buf = buf.as_ref();

        let description = read_description(buf)?;
        let mut dmi = parse_description(&description)?;

        let sheet = image::load_from_memory_with_format(buf, ImageFormat::Png)?.to_rgba8();
        dmi.cut_icons(&sheet)?;

        Ok(dmi)
    }

    fn set(&mut self, key: &str, value: &str) -> eyre::Result<()> {
        match key {
            "version" => self.version = value.to_owned(),
            "width" => self.width = parse_number(key, value)?,
            "height" => self.height = parse_number(key, value)?,
            _ => log::debug!("ignoring header key `{}`", key),
        }
        Ok(())
    }

    fn cut_icons(&mut self, sheet: &RgbaImage) -> eyre::Result<()> {
        let (width, height) = (self.width, self.height);
        eyre::ensure!(width > 0 && height > 0, "icon size must be non-zero");

        let columns = sheet.width() / width;
        let rows = sheet.height() / height;
        let available = columns as usize * rows as usize;
        let needed: usize = self.states.iter().map(DmiState::icon_count).sum();
        eyre::ensure!(
            needed <= available,
            "sheet holds {} icons but the metadata declares {}",
            available,
            needed
        );

        let mut index = 0;
        for state in &mut self.states {
            let mut icons = Vec::with_capacity(state.icon_count());
            for _ in 0..state.icon_count() {
                let x = (index % columns) * width;
                let y = (index / columns) * height;
                icons.push(imageops::crop_imm(sheet, x, y, width, height).to_image());
                index += 1;
            }
            state.icons = icons;
        }

        Ok(())
    }
}

fn read_description(buf: &[u8]) -> eyre::Result<String> {
    let mut decoder = png::Decoder::new(buf);
    decoder.set_ignore_text_chunk(false);
    let mut reader = decoder.read_info()?;
    // text chunks may follow the image data
    let mut pixels = vec![0; reader.output_buffer_size()];
    reader.next_frame(&mut pixels)?;
    reader.finish()?;
    let info = reader.info();

    if let Some(chunk) = info
        .compressed_latin1_text
        .iter()
        .find(|chunk| chunk.keyword == DESCRIPTION_KEYWORD)
    {
        return Ok(chunk.get_text()?);
    }
    if let Some(chunk) = info
        .uncompressed_latin1_text
        .iter()
        .find(|chunk| chunk.keyword == DESCRIPTION_KEYWORD)
    {
        return Ok(chunk.text.clone());
    }

    eyre::bail!("no `{}` text chunk", DESCRIPTION_KEYWORD)
}

/// Parses the text BYOND stores in the `Description` chunk. Icons are left empty.
pub fn parse_description(text: &str) -> eyre::Result<Dmi> {
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
    eyre::ensure!(lines.next() == Some(BEGIN_MARKER), "missing `{}`", BEGIN_MARKER);

    let mut dmi = Dmi {
        version: String::new(),
        width: DEFAULT_ICON_SIZE,
        height: DEFAULT_ICON_SIZE,
        states: Vec::new(),
    };

    let mut ended = false;
    for line in lines {
        if line == END_MARKER {
            ended = true;
            break;
        }

        let (key, value) = line
            .split_once('=')
            .map(|(key, value)| (key.trim(), value.trim()))
            .ok_or_else(|| eyre::eyre!("expected `key = value`: {}", line))?;

        if key == "state" {
            dmi.states.push(DmiState::new(parse_string(value)?));
            continue;
        }
        match dmi.states.last_mut() {
            Some(state) => state.set(key, value)?,
            None => dmi.set(key, value)?,
        }
    }
    eyre::ensure!(ended, "missing `{}`", END_MARKER);

    Ok(dmi)
}

fn parse_number<T>(key: &str, value: &str) -> eyre::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .wrap_err_with(|| format!("invalid value for `{}`: {:?}", key, value))
}

fn parse_string(value: &str) -> eyre::Result<String> {
    let inner = value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .ok_or_else(|| eyre::eyre!("expected a quoted string: {}", value))?;

    let mut res = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            res.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => res.push('\n'),
            Some(escaped) => res.push(escaped),
            None => eyre::bail!("dangling escape: {}", value),
        }
    }

    Ok(res)
}

#[cfg(test)]
pub(crate) mod tests {
    use image::Rgba;

    use super::*;

    pub(crate) const SAMPLE_DESCRIPTION: &str = "# BEGIN DMI
version = 4.0
\twidth = 2
\theight = 2
state = \"idle\"
\tdirs = 1
\tframes = 1
state = \"walk\"
\tdirs = 4
\tframes = 2
\tdelay = 1,3
\trewind = 1
# END DMI
";

    pub(crate) fn icon_colour(index: u32) -> Rgba<u8> {
        let index = index as u8;
        Rgba([index * 20, 255 - index * 20, index, 255])
    }

    /// 3x3 sheet of 2x2 icons, each filled with `icon_colour(index)`.
    pub(crate) fn sample_sheet() -> RgbaImage {
        RgbaImage::from_fn(6, 6, |x, y| icon_colour((y / 2) * 3 + x / 2))
    }

    /// Where the `Description` chunk goes and how it is stored.
    enum TextChunk {
        Compressed,
        Uncompressed,
        CompressedAfterPixels,
    }

    pub(crate) fn encode_dmi(description: &str, sheet: &RgbaImage) -> Vec<u8> {
        encode_png(description, sheet, TextChunk::Compressed)
    }

    fn encode_png(description: &str, sheet: &RgbaImage, text_chunk: TextChunk) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut buf, sheet.width(), sheet.height());
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            match text_chunk {
                TextChunk::Compressed => encoder
                    .add_ztxt_chunk(DESCRIPTION_KEYWORD.to_owned(), description.to_owned())
                    .unwrap(),
                TextChunk::Uncompressed => encoder
                    .add_text_chunk(DESCRIPTION_KEYWORD.to_owned(), description.to_owned())
                    .unwrap(),
                TextChunk::CompressedAfterPixels => {}
            }
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(sheet.as_raw()).unwrap();
            if let TextChunk::CompressedAfterPixels = text_chunk {
                let chunk = png::text_metadata::ZTXtChunk::new(DESCRIPTION_KEYWORD, description);
                writer.write_text_chunk(&chunk).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn parses_header_and_states() {
        let dmi = parse_description(SAMPLE_DESCRIPTION).unwrap();

        assert_eq!(dmi.version, "4.0");
        assert_eq!((dmi.width, dmi.height), (2, 2));
        assert_eq!(dmi.states.len(), 2);

        let walk = &dmi.states[1];
        assert_eq!(walk.name, "walk");
        assert_eq!(walk.dirs, 4);
        assert_eq!(walk.frames, 2);
        assert_eq!(walk.delays, vec![1.0, 3.0]);
        assert!(walk.rewind);
        assert!(!walk.movement);
        assert_eq!(walk.icon_count(), 8);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let dmi = parse_description("# BEGIN DMI\nversion = 4.0\nstate = \"\"\n# END DMI\n").unwrap();

        assert_eq!((dmi.width, dmi.height), (32, 32));
        let state = &dmi.states[0];
        assert_eq!(state.name, "");
        assert_eq!((state.dirs, state.frames), (1, 1));
        assert_eq!(state.delay(0), 1.0);
    }

    #[test]
    fn unescapes_state_names() {
        let dmi = parse_description(
            "# BEGIN DMI\nstate = \"say \\\"hi\\\"\"\n\thotspot = 1,2,3\n\tfoo = bar\n# END DMI",
        )
        .unwrap();

        assert_eq!(dmi.states[0].name, "say \"hi\"");
        assert_eq!(dmi.states[0].hotspot, Some([1, 2, 3]));
    }

    #[test]
    fn rejects_malformed_metadata() {
        assert!(parse_description("version = 4.0\n# END DMI").is_err());
        assert!(parse_description("# BEGIN DMI\nversion = 4.0\n").is_err());
        assert!(parse_description("# BEGIN DMI\nwidth = wide\n# END DMI").is_err());
        assert!(parse_description("# BEGIN DMI\nstate = idle\n# END DMI").is_err());
        assert!(parse_description("# BEGIN DMI\nstate = \"a\"\n\tdirs = 3\n# END DMI").is_err());
        assert!(parse_description("# BEGIN DMI\nno equals sign\n# END DMI").is_err());
    }

    #[test]
    fn cuts_icons_in_sheet_order() {
        let dmi = Dmi::from_bytes(encode_dmi(SAMPLE_DESCRIPTION, &sample_sheet())).unwrap();

        let idle = &dmi.states[0];
        assert_eq!(idle.icons.len(), 1);
        assert_eq!(*idle.icons[0].get_pixel(1, 1), icon_colour(0));

        let walk = &dmi.states[1];
        assert_eq!(walk.icons.len(), 8);
        // frame 1, direction 2 is the 7th icon of the state, 8th of the sheet
        let icon = walk.icon(2, 1).unwrap();
        assert_eq!(icon.dimensions(), (2, 2));
        assert_eq!(*icon.get_pixel(0, 0), icon_colour(7));
        assert!(walk.icon(4, 0).is_none());
        assert!(walk.icon(0, 2).is_none());
    }

    #[test]
    fn accepts_uncompressed_description() {
        let buf = encode_png(SAMPLE_DESCRIPTION, &sample_sheet(), TextChunk::Uncompressed);

        let dmi = Dmi::from_bytes(buf).unwrap();
        assert_eq!(dmi.states.len(), 2);
        assert_eq!(*dmi.states[1].icons[0].get_pixel(0, 0), icon_colour(1));
    }

    #[test]
    fn finds_description_after_image_data() {
        let buf = encode_png(SAMPLE_DESCRIPTION, &sample_sheet(), TextChunk::CompressedAfterPixels);

        let dmi = Dmi::from_bytes(buf).unwrap();
        assert_eq!(dmi.version, "4.0");
        assert_eq!(dmi.states[1].icons.len(), 8);
    }

    #[test]
    fn sheet_too_small_for_metadata() {
        let sheet = RgbaImage::from_pixel(4, 2, icon_colour(0));
        let err = Dmi::from_bytes(encode_dmi(SAMPLE_DESCRIPTION, &sheet)).unwrap_err();
        assert!(err.to_string().contains("sheet holds 2 icons"));
    }

    #[test]
    fn plain_png_is_not_a_dmi() {
        let sheet = sample_sheet();
        let mut buf = Vec::new();
        sheet
            .write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();

        assert!(Dmi::from_bytes(buf).is_err());
    }
}
