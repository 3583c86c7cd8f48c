use std::path::Path;

use image::{Rgba, RgbaImage};

/// One state of 4x4 icons with four directions and three frames.
pub const DESCRIPTION: &str = "# BEGIN DMI
version = 4.0
\twidth = 4
\theight = 4
state = \"blink\"
\tdirs = 4
\tframes = 3
\tdelay = 2,2,5
\tloop = 2
# END DMI
";

pub fn icon_colour(index: u32) -> Rgba<u8> {
    let index = index as u8;
    Rgba([index * 10, 0, 255 - index * 10, 255])
}

/// Writes a DMI whose sheet is 4 icons wide and 3 high, icon `i` filled with `icon_colour(i)`.
pub fn write_dmi(path: &Path) {
    let sheet = RgbaImage::from_fn(16, 12, |x, y| icon_colour((y / 4) * 4 + x / 4));

    let file = std::fs::File::create(path).expect("create dmi");
    let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), sheet.width(), sheet.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    encoder
        .add_ztxt_chunk("Description".to_owned(), DESCRIPTION.to_owned())
        .expect("add description");
    let mut writer = encoder.write_header().expect("write header");
    writer.write_image_data(sheet.as_raw()).expect("write pixels");
    writer.finish().expect("finish png");
}
