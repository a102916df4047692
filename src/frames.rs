//! Frame sets
//!
//! A `FrameSet` is a sorted, deduplicated set of frame numbers with a compact
//! textual encoding used on the CLI boundary: single frames (`12`), ranges
//! (`1-10`), stepped ranges (`1-10x3`), and comma-separated unions of those
//! (`1-10,20,30-40x5`).

use crate::error::FrameSetError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sorted, deduplicated set of frame numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSet {
    frames: Vec<i64>,
}

impl FrameSet {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn from_frames(frames: impl IntoIterator<Item = i64>) -> Self {
        let mut set = Self::new();
        for frame in frames {
            set.insert(frame);
        }
        set
    }

    /// Insert a frame, keeping the set sorted and unique.
    pub fn insert(&mut self, frame: i64) {
        if let Err(index) = self.frames.binary_search(&frame) {
            self.frames.insert(index, frame);
        }
    }

    /// Union another set into this one.
    pub fn union(&mut self, other: &FrameSet) {
        for frame in &other.frames {
            self.insert(*frame);
        }
    }

    pub fn contains(&self, frame: i64) -> bool {
        self.frames.binary_search(&frame).is_ok()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.frames.iter().copied()
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.frames
    }

    /// Parse a frame specification such as `1-10x2,20,30-32`.
    pub fn parse(spec: &str) -> Result<Self, FrameSetError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(FrameSetError::InvalidSpec(spec.to_string()));
        }

        let mut set = Self::new();
        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(FrameSetError::InvalidSpec(spec.to_string()));
            }
            parse_part(part, &mut set)?;
        }
        Ok(set)
    }
}

fn parse_part(part: &str, set: &mut FrameSet) -> Result<(), FrameSetError> {
    let (range, step) = match part.split_once('x') {
        Some((range, step)) => {
            let step: i64 = step
                .parse()
                .map_err(|_| FrameSetError::InvalidSpec(part.to_string()))?;
            if step <= 0 {
                return Err(FrameSetError::InvalidStep(part.to_string()));
            }
            (range, step)
        }
        None => (part, 1),
    };

    // A leading '-' is a negative start frame, not a range separator.
    let separator = range
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '-')
        .map(|(i, _)| i);

    match separator {
        Some(i) => {
            let start: i64 = range[..i]
                .parse()
                .map_err(|_| FrameSetError::InvalidSpec(part.to_string()))?;
            let end: i64 = range[i + 1..]
                .parse()
                .map_err(|_| FrameSetError::InvalidSpec(part.to_string()))?;
            if start > end {
                return Err(FrameSetError::InvertedRange(part.to_string()));
            }
            let mut frame = start;
            while frame <= end {
                set.insert(frame);
                frame += step;
            }
        }
        None => {
            let frame: i64 = range
                .parse()
                .map_err(|_| FrameSetError::InvalidSpec(part.to_string()))?;
            set.insert(frame);
        }
    }
    Ok(())
}

impl fmt::Display for FrameSet {
    /// Produce the most compact encoding: consecutive runs with a shared
    /// step collapse into `start-endxstep` parts.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        let frames = &self.frames;
        let mut i = 0;

        while i < frames.len() {
            // Extend a run with a constant step from frames[i].
            let mut j = i + 1;
            let step = if j < frames.len() {
                frames[j] - frames[i]
            } else {
                0
            };
            while j + 1 < frames.len() && frames[j + 1] - frames[j] == step {
                j += 1;
            }

            if j > i + 1 {
                // Three or more frames: worth a range part.
                if step == 1 {
                    parts.push(format!("{}-{}", frames[i], frames[j]));
                } else {
                    parts.push(format!("{}-{}x{}", frames[i], frames[j], step));
                }
                i = j + 1;
            } else {
                parts.push(frames[i].to_string());
                i += 1;
            }
        }

        write!(f, "{}", parts.join(","))
    }
}

impl FromIterator<i64> for FrameSet {
    fn from_iter<T: IntoIterator<Item = i64>>(iter: T) -> Self {
        Self::from_frames(iter)
    }
}
