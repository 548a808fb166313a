//! Boundary tokens: a world name plus block coordinates, serialized as
//! `world;x;y;z`.
//!
//! Both storage backends keep corners in this form. Decoding checks the world
//! against the host's [`WorldRegistry`], because worlds can be unloaded or
//! renamed between a save and the next load.

use std::fmt;

use thiserror::Error;

use crate::host::WorldRegistry;

const DELIMITER: char = ';';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoundaryError {
    #[error("malformed boundary token {token:?}: {reason}")]
    Malformed { token: String, reason: String },
    #[error("world {0:?} is not loaded")]
    WorldUnavailable(String),
}

/// A block position inside a named world.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Boundary {
    pub world: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Boundary {
    pub fn new(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    pub fn to_token(&self) -> String {
        self.to_string()
    }

    /// Parse a token without consulting any world registry.
    pub fn parse(token: &str) -> Result<Self, BoundaryError> {
        let malformed = |reason: &str| BoundaryError::Malformed {
            token: token.to_string(),
            reason: reason.to_string(),
        };

        // World names may not contain the delimiter, so the coordinates are
        // always the last three fields.
        let mut parts = token.rsplitn(4, DELIMITER);
        let z = parts.next().ok_or_else(|| malformed("missing z"))?;
        let y = parts.next().ok_or_else(|| malformed("missing y"))?;
        let x = parts.next().ok_or_else(|| malformed("missing x"))?;
        let world = parts.next().ok_or_else(|| malformed("missing world"))?;

        if world.is_empty() {
            return Err(malformed("empty world name"));
        }

        let coord = |s: &str, axis: &str| {
            s.trim()
                .parse::<i32>()
                .map_err(|e| malformed(&format!("bad {} coordinate: {}", axis, e)))
        };

        Ok(Self {
            world: world.to_string(),
            x: coord(x, "x")?,
            y: coord(y, "y")?,
            z: coord(z, "z")?,
        })
    }

    /// Parse a token and require its world to be loaded right now.
    pub fn from_token(token: &str, worlds: &dyn WorldRegistry) -> Result<Self, BoundaryError> {
        let boundary = Self::parse(token)?;
        if !worlds.is_world_loaded(&boundary.world) {
            return Err(BoundaryError::WorldUnavailable(boundary.world));
        }
        Ok(boundary)
    }

    /// World name referenced by a token, if the token has one.
    pub fn world_of(token: &str) -> Option<&str> {
        token.split(DELIMITER).next().filter(|w| !w.is_empty())
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{d}{}{d}{}{d}{}",
            self.world,
            self.x,
            self.y,
            self.z,
            d = DELIMITER
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{AllWorlds, StaticWorlds};

    #[test]
    fn test_token_roundtrip_negative_coords() {
        let b = Boundary::new("world_nether", -120, 4, 77_000);
        let token = b.to_token();
        assert_eq!(token, "world_nether;-120;4;77000");
        assert_eq!(Boundary::from_token(&token, &AllWorlds).unwrap(), b);
    }

    #[test]
    fn test_unloaded_world_is_recoverable() {
        let worlds = StaticWorlds::new(["earth"]);
        let err = Boundary::from_token("mars;1;2;3", &worlds).unwrap_err();
        assert_eq!(err, BoundaryError::WorldUnavailable("mars".to_string()));
        assert!(Boundary::from_token("earth;1;2;3", &worlds).is_ok());
    }

    #[test]
    fn test_malformed_tokens() {
        for token in ["", "earth;1;2", ";1;2;3", "earth;a;2;3", "earth;1;2;3.5"] {
            match Boundary::parse(token) {
                Err(BoundaryError::Malformed { .. }) => {}
                other => panic!("{:?} parsed as {:?}", token, other),
            }
        }
    }

    #[test]
    fn test_world_of() {
        assert_eq!(Boundary::world_of("earth;0;0;0"), Some("earth"));
        assert_eq!(Boundary::world_of(";0;0;0"), None);
    }
}
