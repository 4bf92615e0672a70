use crate::{
    config::{FrameConfig, TensorLayout},
    video::{DecodeError, FrameSource},
};
use image::{
    imageops::{self, FilterType},
    RgbImage,
};
use ndarray::{Array4, Array5, ArrayView4, Axis};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("no decodable frames")]
    NoFrames,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("expected {expected} frames, got {actual}")]
    FrameCount { expected: usize, actual: usize },
}

/// Frame indices for a clip of `total` frames when `count` are needed.
///
/// With `total >= count` the indices are spread evenly over `[0, total)` by
/// rounding `i * (total - 1) / (count - 1)`, so they are strictly increasing
/// and start and end on the first and last frame. With `total < count` every
/// frame is used once and the last one is repeated to fill the remaining slots.
pub fn sample_indices(total: usize, count: usize) -> Vec<usize> {
    if total == 0 || count == 0 {
        return Vec::new();
    }
    if total < count {
        return (0..count).map(|i| i.min(total - 1)).collect();
    }
    if count == 1 {
        return vec![0];
    }

    let span = total - 1;
    let steps = count - 1;
    // Integer round-half-up of i * span / steps.
    (0..count)
        .map(|i| (2 * i * span + steps) / (2 * steps))
        .collect()
}

/// Fixed-shape model input: `(frames, height, width, channels)`, RGB,
/// scaled to `[0, 1]` then standardized with the configured mean and std.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBatch {
    frames: Array4<f32>,
}

impl FrameBatch {
    pub fn from_frames(frames: &[RgbImage], config: &FrameConfig) -> Result<Self, SampleError> {
        if frames.len() != config.num_frames {
            return Err(SampleError::FrameCount {
                expected: config.num_frames,
                actual: frames.len(),
            });
        }

        let (height, width) = (config.height as usize, config.width as usize);
        let mut tensor = Array4::<f32>::zeros((frames.len(), height, width, 3));

        for (t, frame) in frames.iter().enumerate() {
            let resized;
            let frame = if frame.dimensions() == (config.width, config.height) {
                frame
            } else {
                resized = resize(frame, config);
                &resized
            };

            for (x, y, pixel) in frame.enumerate_pixels() {
                for (c, value) in pixel.0.iter().enumerate() {
                    tensor[[t, y as usize, x as usize, c]] =
                        (*value as f32 / 255.0 - config.mean[c]) / config.std[c];
                }
            }
        }

        Ok(Self { frames: tensor })
    }

    pub fn len(&self) -> usize {
        self.frames.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `[frames, height, width, channels]`
    pub fn shape(&self) -> [usize; 4] {
        let dims = self.frames.dim();
        [dims.0, dims.1, dims.2, dims.3]
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.frames.view()
    }

    /// Adds the batch axis and arranges the tensor in `layout`.
    pub fn to_model_input(&self, layout: TensorLayout) -> Array5<f32> {
        let batched = self.frames.view().insert_axis(Axis(0));
        match layout {
            TensorLayout::Nthwc => batched.to_owned(),
            TensorLayout::Ncthw => batched
                .permuted_axes([0, 4, 1, 2, 3])
                .as_standard_layout()
                .into_owned(),
        }
    }
}

fn resize(frame: &RgbImage, config: &FrameConfig) -> RgbImage {
    if frame.dimensions() == (config.width, config.height) {
        return frame.clone();
    }
    imageops::resize(frame, config.width, config.height, FilterType::Triangle)
}

/// Frames kept per sampled slot while streaming, for resampling a stream that
/// ends early.
const HISTORY_FACTOR: usize = 4;

/// Resized copies of every `stride`-th decoded frame. The stride doubles
/// whenever more than `limit` frames are held, so memory stays bounded while
/// the kept frames stay evenly spread over what was decoded.
struct Thinned {
    stride: usize,
    limit: usize,
    frames: Vec<(usize, RgbImage)>,
}

impl Thinned {
    fn new(limit: usize) -> Self {
        Self {
            stride: 1,
            limit: limit.max(2),
            frames: Vec::new(),
        }
    }

    fn record(&mut self, position: usize, frame: &RgbImage, config: &FrameConfig) {
        if position % self.stride != 0 {
            return;
        }
        self.frames.push((position, resize(frame, config)));
        if self.frames.len() > self.limit {
            self.stride *= 2;
            let stride = self.stride;
            self.frames.retain(|(p, _)| p % stride == 0);
        }
    }

    /// The kept frame closest to `position`; ties go to the earlier frame.
    fn nearest(&self, position: usize) -> Option<&RgbImage> {
        let after = self.frames.partition_point(|(p, _)| *p < position);
        let candidates = [after.checked_sub(1), Some(after)];
        candidates
            .into_iter()
            .flatten()
            .filter_map(|i| self.frames.get(i))
            .min_by_key(|(p, _)| p.abs_diff(position))
            .map(|(_, frame)| frame)
    }
}

#[derive(Debug, Clone)]
pub struct FrameSampler {
    config: FrameConfig,
}

impl FrameSampler {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub async fn sample<S>(&self, source: &mut S) -> Result<FrameBatch, SampleError>
    where
        S: FrameSource + ?Sized,
    {
        let frames = match source.frame_count_hint() {
            Some(total) if total > 0 => self.pick_by_index(source, total).await?,
            _ => self.pick_after_full_decode(source).await?,
        };
        FrameBatch::from_frames(&frames, &self.config)
    }

    /// Streams through the clip once, keeping only the selected frames. If
    /// the stream ends before the reported count, the batch is sampled again
    /// over the frames that were actually decoded.
    async fn pick_by_index<S>(&self, source: &mut S, total: usize) -> Result<Vec<RgbImage>, SampleError>
    where
        S: FrameSource + ?Sized,
    {
        let count = self.config.num_frames;
        let indices = sample_indices(total, count);
        let mut wanted = indices.iter().copied().peekable();
        let mut picked: Vec<RgbImage> = Vec::with_capacity(count);
        let mut history = Thinned::new(count.saturating_mul(HISTORY_FACTOR));
        let mut last: Option<RgbImage> = None;
        let mut position = 0usize;

        while picked.len() < count {
            let Some(frame) = source.next_frame().await? else {
                break;
            };
            history.record(position, &frame, &self.config);
            while wanted.next_if_eq(&position).is_some() {
                picked.push(resize(&frame, &self.config));
            }
            position += 1;
            last = Some(frame);
        }

        if picked.len() == count {
            return Ok(picked);
        }

        let last = last.map(|frame| resize(&frame, &self.config)).ok_or(SampleError::NoFrames)?;
        tracing::debug!(
            decoded = position,
            reported = total,
            "stream ended before the reported frame count, sampling the decoded frames"
        );
        Ok(sample_indices(position, count)
            .into_iter()
            .map(|i| {
                if i + 1 == position {
                    last.clone()
                } else {
                    history.nearest(i).unwrap_or(&last).clone()
                }
            })
            .collect())
    }

    /// Used when the container reports no frame count: decodes up to
    /// `max_decoded_frames` and samples from what was decoded.
    async fn pick_after_full_decode<S>(&self, source: &mut S) -> Result<Vec<RgbImage>, SampleError>
    where
        S: FrameSource + ?Sized,
    {
        let cap = self.config.max_decoded_frames;
        let mut decoded = Vec::new();
        while decoded.len() < cap {
            match source.next_frame().await? {
                Some(frame) => decoded.push(resize(&frame, &self.config)),
                None => break,
            }
        }
        if decoded.len() == cap {
            tracing::warn!(cap, "frame cap reached, sampling from the decoded prefix");
        }
        if decoded.is_empty() {
            return Err(SampleError::NoFrames);
        }

        Ok(sample_indices(decoded.len(), self.config.num_frames)
            .into_iter()
            .map(|i| decoded[i].clone())
            .collect())
    }
}
