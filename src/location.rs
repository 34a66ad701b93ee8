//! Geographic samples published as telemetry or attached to alarms.

use serde::{Deserialize, Serialize};

use crate::status::Status;
use crate::NAME_MAX;

/// Origin of a location fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    Fixed,
    Gps,
    Wifi,
    Unknown,
}

/// A geographic sample.  Latitude and longitude are mandatory; every other
/// field is optional and absent until its setter is called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    latitude: f64,
    longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    altitude_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<LocationSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
}

impl Location {
    /// Create a sample at the given coordinates.  Latitude must lie in
    /// [-90, 90] and longitude in [-180, 180].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, Status> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(Status::OutOfRange);
        }
        Ok(Location {
            latitude,
            longitude,
            accuracy: None,
            altitude: None,
            altitude_accuracy: None,
            heading: None,
            speed: None,
            source: None,
            tag: None,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Replace the coordinates, applying the same interval checks as
    /// [`Location::new`].
    pub fn set_coordinates(&mut self, latitude: f64, longitude: f64) -> Result<(), Status> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(Status::OutOfRange);
        }
        self.latitude = latitude;
        self.longitude = longitude;
        Ok(())
    }

    pub fn set_accuracy(&mut self, accuracy: f64) {
        self.accuracy = Some(accuracy);
    }

    pub fn set_altitude(&mut self, altitude: f64) {
        self.altitude = Some(altitude);
    }

    pub fn set_altitude_accuracy(&mut self, accuracy: f64) {
        self.altitude_accuracy = Some(accuracy);
    }

    /// Heading in degrees, [0, 360).
    pub fn set_heading(&mut self, heading: f64) -> Result<(), Status> {
        if !(0.0..360.0).contains(&heading) {
            return Err(Status::OutOfRange);
        }
        self.heading = Some(heading);
        Ok(())
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = Some(speed);
    }

    pub fn set_source(&mut self, source: LocationSource) {
        self.source = Some(source);
    }

    /// Free-form tag, at most `NAME_MAX` characters.
    pub fn set_tag(&mut self, tag: &str) -> Result<(), Status> {
        if tag.len() > NAME_MAX {
            return Err(Status::OutOfRange);
        }
        self.tag = Some(tag.to_string());
        Ok(())
    }

    pub fn accuracy(&self) -> Option<f64> {
        self.accuracy
    }

    pub fn altitude(&self) -> Option<f64> {
        self.altitude
    }

    pub fn altitude_accuracy(&self) -> Option<f64> {
        self.altitude_accuracy
    }

    pub fn heading(&self) -> Option<f64> {
        self.heading
    }

    pub fn speed(&self) -> Option<f64> {
        self.speed
    }

    pub fn source(&self) -> Option<LocationSource> {
        self.source
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_interval_coordinates() {
        assert_eq!(Location::new(91.0, 0.0), Err(Status::OutOfRange));
        assert_eq!(Location::new(0.0, -181.0), Err(Status::OutOfRange));
        assert!(Location::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn heading_is_half_open() {
        let mut loc = Location::new(0.0, 0.0).unwrap();
        assert_eq!(loc.set_heading(360.0), Err(Status::OutOfRange));
        assert!(loc.set_heading(359.9).is_ok());
        assert!(loc.set_heading(0.0).is_ok());
    }

    #[test]
    fn deep_copy_is_independent() {
        let mut original = Location::new(45.0, -75.0).unwrap();
        original.set_altitude(100.0);
        original.set_tag("home").unwrap();

        let mut copy = original.clone();
        assert_eq!(copy, original);
        assert_ne!(
            original.tag().unwrap().as_ptr(),
            copy.tag().unwrap().as_ptr(),
            "tag buffers must not be shared"
        );

        copy.set_tag("away").unwrap();
        assert_eq!(original.tag(), Some("home"));
    }
}
