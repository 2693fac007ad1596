// ----------------------------------------------------------------------------
// Synthetic source (stub://) for dry runs and tests
// ----------------------------------------------------------------------------
//
// Query parameters:
//   size=<px>            square frame edge (default 64)
//   scene_frames=<n>     frames before the scene brightness changes (default 30)
//   scenes=<n>           number of distinct brightness levels (default 5)
//   fail_every=<n>       every n-th fetch fails with a timeout (default never)

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, GrayImage, Luma};
use rand::Rng;
use url::Url;

use super::{Frame, FrameSource};
use crate::AcquisitionError;

pub struct SyntheticSource {
    name: String,
    size: u32,
    scene_frames: u64,
    scenes: u8,
    fail_every: Option<u64>,
    fetches: u64,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).context("parse stub url")?;
        if url.scheme() != "stub" {
            return Err(anyhow!("synthetic source expects stub://, got {}", raw));
        }
        let mut source = Self {
            name: raw.to_string(),
            size: 64,
            scene_frames: 30,
            scenes: 5,
            fail_every: None,
            fetches: 0,
            frame_count: 0,
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "size" => source.size = parse_param(&key, &value)?,
                "scene_frames" => source.scene_frames = parse_param(&key, &value)?,
                "scenes" => source.scenes = parse_param(&key, &value)?,
                "fail_every" => source.fail_every = Some(parse_param(&key, &value)?),
                other => log::warn!("stub source ignores unknown parameter '{}'", other),
            }
        }
        if source.size == 0 || source.scene_frames == 0 || source.scenes == 0 {
            return Err(anyhow!("stub parameters size, scene_frames, scenes must be > 0"));
        }
        if source.fail_every == Some(0) {
            return Err(anyhow!("stub parameter fail_every must be > 0"));
        }
        Ok(source)
    }

    /// Brightness level of the scene currently being "filmed".
    fn scene_level(&self) -> u8 {
        let scene = (self.frame_count / self.scene_frames) % u64::from(self.scenes);
        if self.scenes == 1 {
            return 128;
        }
        (scene * 255 / u64::from(self.scenes - 1)) as u8
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.name)
    }

    fn fetch_frame(&mut self) -> Result<Frame, AcquisitionError> {
        self.fetches += 1;
        if let Some(every) = self.fail_every {
            if self.fetches % every == 0 {
                return Err(AcquisitionError::Timeout(format!(
                    "synthetic fault on fetch #{}",
                    self.fetches
                )));
            }
        }

        let level = self.scene_level();
        let mut rng = rand::thread_rng();
        let image = GrayImage::from_fn(self.size, self.size, |_, _| {
            let noise: i16 = rng.gen_range(-4..=4);
            Luma([(i16::from(level) + noise).clamp(0, 255) as u8])
        });
        self.frame_count += 1;
        Ok(Frame::new(DynamicImage::ImageLuma8(image), self.frame_count))
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("stub parameter {} has invalid value '{}'", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_frames_of_requested_size() {
        let mut source = SyntheticSource::from_url("stub://cam?size=16").unwrap();
        let frame = source.fetch_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (16, 16));
        assert_eq!(frame.sequence, 1);
    }

    #[test]
    fn injects_periodic_faults() {
        let mut source = SyntheticSource::from_url("stub://cam?size=4&fail_every=3").unwrap();
        assert!(source.fetch_frame().is_ok());
        assert!(source.fetch_frame().is_ok());
        assert!(matches!(
            source.fetch_frame(),
            Err(AcquisitionError::Timeout(_))
        ));
        assert!(source.fetch_frame().is_ok());
    }

    #[test]
    fn scene_brightness_changes_over_time() {
        let mut source =
            SyntheticSource::from_url("stub://cam?size=2&scene_frames=2&scenes=2").unwrap();
        let dark = source.fetch_frame().unwrap().image.to_luma8();
        source.fetch_frame().unwrap();
        let bright = source.fetch_frame().unwrap().image.to_luma8();
        assert!(dark.get_pixel(0, 0)[0] < 10);
        assert!(bright.get_pixel(0, 0)[0] > 245);
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(SyntheticSource::from_url("stub://cam?size=abc").is_err());
        assert!(SyntheticSource::from_url("stub://cam?fail_every=0").is_err());
        assert!(SyntheticSource::from_url("http://cam").is_err());
    }
}
