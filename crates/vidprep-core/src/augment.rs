use image::{imageops, Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use rand::Rng;

/// One on/off combination of the three augmentation transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Augmentation {
    pub flip: bool,
    pub rotate: bool,
    pub brightness: bool,
}

impl Augmentation {
    const ORIGINAL: Augmentation = Augmentation {
        flip: false,
        rotate: false,
        brightness: false,
    };

    /// Every combination, untouched original first.
    pub fn all() -> [Augmentation; 8] {
        let a = |flip, rotate, brightness| Augmentation {
            flip,
            rotate,
            brightness,
        };
        [
            Self::ORIGINAL,
            a(true, false, false),
            a(false, true, false),
            a(false, false, true),
            a(true, true, false),
            a(true, false, true),
            a(false, true, true),
            a(true, true, true),
        ]
    }

    /// Filename suffix such as `flip_brightness`, or `None` for the original.
    pub fn suffix(&self) -> Option<String> {
        let parts: Vec<&str> = [
            (self.flip, "flip"),
            (self.rotate, "rotate"),
            (self.brightness, "brightness"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();

        (!parts.is_empty()).then(|| parts.join("_"))
    }

    /// Output file name for a source video with the given stem.
    pub fn output_name(&self, stem: &str) -> String {
        match self.suffix() {
            Some(suffix) => format!("{stem}_{suffix}.mp4"),
            None => format!("{stem}.mp4"),
        }
    }

    /// Apply the enabled transforms in order: flip, rotate, brightness.
    pub fn apply(&self, image: &RgbImage, params: &AugmentParams) -> RgbImage {
        let mut out = image.clone();
        if self.flip {
            out = flip_horizontal(&out);
        }
        if self.rotate {
            out = rotate(&out, params.rotate_degrees);
        }
        if self.brightness {
            out = adjust_brightness(&out, params.contrast, params.brightness);
        }
        out
    }
}

/// Transform parameters shared by every combination of one video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentParams {
    /// Rotation angle in degrees, counter-clockwise for positive values.
    pub rotate_degrees: f32,
    /// Multiplier applied to every subpixel.
    pub contrast: f32,
    /// Offset added after the contrast multiplier.
    pub brightness: f32,
}

impl AugmentParams {
    /// Draw a rotation angle uniformly from `[-max_rotation, max_rotation)`.
    pub fn sample<R: Rng>(rng: &mut R, max_rotation: f32, contrast: f32, brightness: f32) -> Self {
        let rotate_degrees = if max_rotation > 0.0 {
            rng.gen_range(-max_rotation..max_rotation)
        } else {
            0.0
        };
        Self {
            rotate_degrees,
            contrast,
            brightness,
        }
    }
}

/// Mirror around the vertical axis.
pub fn flip_horizontal(image: &RgbImage) -> RgbImage {
    imageops::flip_horizontal(image)
}

/// Rotate about the image centre, keeping the original size. Pixels that
/// come from outside the source are black.
pub fn rotate(image: &RgbImage, degrees: f32) -> RgbImage {
    // imageproc rotates clockwise for positive angles.
    rotate_about_center(
        image,
        -degrees.to_radians(),
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
    )
}

/// `saturate(|contrast * v + brightness|)` on every subpixel.
pub fn adjust_brightness(image: &RgbImage, contrast: f32, brightness: f32) -> RgbImage {
    let mut out = image.clone();
    for p in out.pixels_mut() {
        for c in p.0.iter_mut() {
            let v = (contrast * f32::from(*c) + brightness).abs();
            *c = v.round().min(255.0) as u8;
        }
    }
    out
}
