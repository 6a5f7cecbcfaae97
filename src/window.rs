//! Context windows over the observation stream or the result log

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSource {
    Inputs,
    Results,
}

/// Where the anchor position sits inside the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPosition {
    /// Anchor in the middle; the extra element of an even size goes before it
    Centered,
    /// Anchor is the last element
    Back,
    /// Anchor is the first element
    Front,
}

/// Fixed-size slice descriptor, recomputed every step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub source: WindowSource,
    pub size: usize,
    pub position: WindowPosition,
}

impl Window {
    pub const fn new(source: WindowSource, size: usize, position: WindowPosition) -> Self {
        Self {
            source,
            size,
            position,
        }
    }

    /// Elements required before the anchor
    pub fn before(&self) -> usize {
        match self.position {
            WindowPosition::Centered => self.size / 2,
            WindowPosition::Back => self.size.saturating_sub(1),
            WindowPosition::Front => 0,
        }
    }

    /// Elements required after the anchor
    pub fn after(&self) -> usize {
        let span = self.size.saturating_sub(1);
        span - self.before()
    }

    /// Window around `anchor`, or `None` if it does not fit in `data`
    pub fn slice<'a, T>(&self, data: &'a [T], anchor: usize) -> Option<&'a [T]> {
        if self.size == 0 {
            return None;
        }
        let start = anchor.checked_sub(self.before())?;
        let end = anchor + self.after();
        data.get(start..=end)
    }

    /// Window around `anchor`, truncated at the edges of `data`
    pub fn clamped_slice<'a, T>(&self, data: &'a [T], anchor: usize) -> &'a [T] {
        if data.is_empty() || self.size == 0 {
            return &[];
        }
        let anchor = anchor.min(data.len() - 1);
        let start = anchor.saturating_sub(self.before());
        let end = (anchor + self.after()).min(data.len() - 1);
        &data[start..=end]
    }

    /// Highest anchor whose look-ahead fits in `len` elements.
    ///
    /// Anchors near the start are not held back: the models' starting state
    /// stands in for the missing leading context.
    pub fn last_full_anchor(&self, len: usize) -> Option<usize> {
        len.checked_sub(1)?.checked_sub(self.after())
    }
}
