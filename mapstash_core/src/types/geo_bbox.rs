use anyhow::{Result, ensure};
use std::fmt::Debug;

/// Latitude limit of the square Web Mercator world.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;
/// WGS84 equatorial radius in meters.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// A geographical bounding box (`GeoBBox`) represents a rectangular area on a map
/// defined by its west, south, east and north edges in degrees.
///
/// A box whose `west` edge lies east of its `east` edge crosses the antimeridian,
/// e.g. `west = 170, east = -170` covers the 20° around the date line.
///
/// # Examples
///
/// ```
/// use mapstash_core::GeoBBox;
///
/// let bbox = GeoBBox::new(-10.0, -5.0, 10.0, 5.0).unwrap();
/// assert_eq!(bbox.as_tuple(), (-10.0, -5.0, 10.0, 5.0));
/// assert!(!bbox.crosses_antimeridian());
///
/// let pacific = GeoBBox::new(170.0, -10.0, -170.0, 10.0).unwrap();
/// assert!(pacific.crosses_antimeridian());
/// ```
#[derive(Clone, Copy, PartialEq)]
pub struct GeoBBox {
	pub west: f64,
	pub south: f64,
	pub east: f64,
	pub north: f64,
}

impl GeoBBox {
	/// Creates a new `GeoBBox` from `west, south, east, north`.
	///
	/// # Errors
	/// Returns an error if a longitude lies outside `[-180, 180]`, a latitude outside `[-90, 90]`,
	/// or `south > north`.
	pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<GeoBBox> {
		GeoBBox {
			west,
			south,
			east,
			north,
		}
		.checked()
	}

	/// Does this box wrap around the date line?
	#[must_use]
	pub fn crosses_antimeridian(&self) -> bool {
		self.west > self.east
	}

	/// Split a box crossing the antimeridian into its western and eastern halves.
	///
	/// Boxes that do not cross it are returned unchanged as the only element.
	#[must_use]
	pub fn split_at_antimeridian(&self) -> Vec<GeoBBox> {
		if self.crosses_antimeridian() {
			vec![
				GeoBBox {
					east: 180.0,
					..*self
				},
				GeoBBox {
					west: -180.0,
					..*self
				},
			]
		} else {
			vec![*self]
		}
	}

	/// Clamp latitudes to the range the Web Mercator projection can represent.
	pub fn limit_to_mercator(&mut self) {
		self.south = self.south.max(-MAX_MERCATOR_LAT);
		self.north = self.north.min(MAX_MERCATOR_LAT);
	}

	#[must_use]
	pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
		(self.west, self.south, self.east, self.north)
	}

	#[must_use]
	pub fn as_array(&self) -> [f64; 4] {
		[self.west, self.south, self.east, self.north]
	}

	fn checked(self) -> Result<Self> {
		ensure!(
			(-180.0..=180.0).contains(&self.west),
			"west ({}) must be within [-180, 180]",
			self.west
		);
		ensure!(
			(-180.0..=180.0).contains(&self.east),
			"east ({}) must be within [-180, 180]",
			self.east
		);
		ensure!(
			(-90.0..=90.0).contains(&self.south),
			"south ({}) must be within [-90, 90]",
			self.south
		);
		ensure!(
			(-90.0..=90.0).contains(&self.north),
			"north ({}) must be within [-90, 90]",
			self.north
		);
		ensure!(
			self.south <= self.north,
			"south ({}) must be <= north ({})",
			self.south,
			self.north
		);
		Ok(self)
	}
}

impl Debug for GeoBBox {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "GeoBBox({}, {}, {}, {})", self.west, self.south, self.east, self.north)
	}
}

/// Parses `"west,south,east,north"`, as used on the command line.
impl std::str::FromStr for GeoBBox {
	type Err = anyhow::Error;

	fn from_str(text: &str) -> Result<Self> {
		let values = text
			.split(',')
			.map(|part| part.trim().parse::<f64>())
			.collect::<Result<Vec<f64>, _>>()?;
		GeoBBox::try_from(values)
	}
}

impl TryFrom<Vec<f64>> for GeoBBox {
	type Error = anyhow::Error;

	fn try_from(input: Vec<f64>) -> Result<Self> {
		ensure!(
			input.len() == 4,
			"bbox must have exactly 4 values (west, south, east, north), got {}",
			input.len()
		);
		GeoBBox::new(input[0], input[1], input[2], input[3])
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[test]
	fn new_validates() {
		assert!(GeoBBox::new(-180.0, -90.0, 180.0, 90.0).is_ok());
		assert!(GeoBBox::new(-181.0, 0.0, 0.0, 1.0).is_err());
		assert!(GeoBBox::new(0.0, 0.0, 181.0, 1.0).is_err());
		assert!(GeoBBox::new(0.0, -91.0, 1.0, 1.0).is_err());
		assert!(GeoBBox::new(0.0, 5.0, 1.0, 1.0).is_err());
		// west > east is allowed and means crossing the date line
		assert!(GeoBBox::new(170.0, 0.0, -170.0, 1.0).is_ok());
	}

	#[test]
	fn split() -> Result<()> {
		let bbox = GeoBBox::new(170.0, -10.0, -170.0, 10.0)?;
		let parts = bbox.split_at_antimeridian();
		assert_eq!(parts.len(), 2);
		assert_eq!(parts[0].as_tuple(), (170.0, -10.0, 180.0, 10.0));
		assert_eq!(parts[1].as_tuple(), (-180.0, -10.0, -170.0, 10.0));

		let bbox = GeoBBox::new(-10.0, -10.0, 10.0, 10.0)?;
		assert_eq!(bbox.split_at_antimeridian(), vec![bbox]);
		Ok(())
	}

	#[test]
	fn limit_to_mercator() -> Result<()> {
		let mut bbox = GeoBBox::new(-180.0, -90.0, 180.0, 90.0)?;
		bbox.limit_to_mercator();
		assert_eq!(bbox.south, -MAX_MERCATOR_LAT);
		assert_eq!(bbox.north, MAX_MERCATOR_LAT);
		Ok(())
	}

	#[rstest]
	#[case("13.08,52.33,13.76,52.67", Some((13.08, 52.33, 13.76, 52.67)))]
	#[case(" -1, -2 , 3,4", Some((-1.0, -2.0, 3.0, 4.0)))]
	#[case("1,2,3", None)]
	#[case("a,b,c,d", None)]
	fn parse(#[case] text: &str, #[case] expected: Option<(f64, f64, f64, f64)>) {
		assert_eq!(text.parse::<GeoBBox>().ok().map(|b| b.as_tuple()), expected);
	}

	#[test]
	fn debug_format() -> Result<()> {
		assert_eq!(format!("{:?}", GeoBBox::new(1.0, 2.0, 3.0, 4.0)?), "GeoBBox(1, 2, 3, 4)");
		Ok(())
	}
}
