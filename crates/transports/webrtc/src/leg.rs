//! Stream legs and the fixed two-key leg map
//!
//! Every session carries exactly two media flows, camera and screen.
//! [`LegMap`] stores one value per leg so per-leg state is never
//! duplicated into parallel field sets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

use crate::{Error, Result};

/// One of the two independent media flows of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamLeg {
    Camera,
    Screen,
}

impl StreamLeg {
    /// Both legs, in a stable order
    pub const ALL: [StreamLeg; 2] = [StreamLeg::Camera, StreamLeg::Screen];

    /// Wire name of the leg
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamLeg::Camera => "camera",
            StreamLeg::Screen => "screen",
        }
    }

    /// The other leg of the pair
    pub fn sibling(&self) -> StreamLeg {
        match self {
            StreamLeg::Camera => StreamLeg::Screen,
            StreamLeg::Screen => StreamLeg::Camera,
        }
    }
}

impl fmt::Display for StreamLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamLeg {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "camera" => Ok(StreamLeg::Camera),
            "screen" => Ok(StreamLeg::Screen),
            other => Err(Error::ProtocolError(format!("unknown stream name: {}", other))),
        }
    }
}

/// Mapping from leg to a per-leg value, always holding both keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegMap<T> {
    camera: T,
    screen: T,
}

impl<T> LegMap<T> {
    pub fn new(camera: T, screen: T) -> Self {
        Self { camera, screen }
    }

    /// Build a map by evaluating `f` once per leg
    pub fn from_fn(mut f: impl FnMut(StreamLeg) -> T) -> Self {
        Self {
            camera: f(StreamLeg::Camera),
            screen: f(StreamLeg::Screen),
        }
    }

    /// Build a map from `(leg, value)` pairs.
    ///
    /// Fails unless each leg appears exactly once.
    pub fn try_from_pairs(pairs: impl IntoIterator<Item = (StreamLeg, T)>) -> Result<Self> {
        let mut camera = None;
        let mut screen = None;
        for (leg, value) in pairs {
            let slot = match leg {
                StreamLeg::Camera => &mut camera,
                StreamLeg::Screen => &mut screen,
            };
            if slot.replace(value).is_some() {
                return Err(Error::InvalidConfig(format!("duplicate leg: {}", leg)));
            }
        }
        match (camera, screen) {
            (Some(camera), Some(screen)) => Ok(Self { camera, screen }),
            (None, _) => Err(Error::InvalidConfig("missing leg: camera".to_string())),
            (_, None) => Err(Error::InvalidConfig("missing leg: screen".to_string())),
        }
    }

    pub fn get(&self, leg: StreamLeg) -> &T {
        match leg {
            StreamLeg::Camera => &self.camera,
            StreamLeg::Screen => &self.screen,
        }
    }

    pub fn get_mut(&mut self, leg: StreamLeg) -> &mut T {
        match leg {
            StreamLeg::Camera => &mut self.camera,
            StreamLeg::Screen => &mut self.screen,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (StreamLeg, &T)> {
        [(StreamLeg::Camera, &self.camera), (StreamLeg::Screen, &self.screen)].into_iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (StreamLeg, &mut T)> {
        [
            (StreamLeg::Camera, &mut self.camera),
            (StreamLeg::Screen, &mut self.screen),
        ]
        .into_iter()
    }

    pub fn map<U>(self, mut f: impl FnMut(StreamLeg, T) -> U) -> LegMap<U> {
        LegMap {
            camera: f(StreamLeg::Camera, self.camera),
            screen: f(StreamLeg::Screen, self.screen),
        }
    }

    /// True when `pred` holds for both legs
    pub fn all(&self, mut pred: impl FnMut(&T) -> bool) -> bool {
        pred(&self.camera) && pred(&self.screen)
    }
}

impl<T> Index<StreamLeg> for LegMap<T> {
    type Output = T;

    fn index(&self, leg: StreamLeg) -> &T {
        self.get(leg)
    }
}

impl<T> IndexMut<StreamLeg> for LegMap<T> {
    fn index_mut(&mut self, leg: StreamLeg) -> &mut T {
        self.get_mut(leg)
    }
}
