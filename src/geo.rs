use crate::model::Coordinates;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const WALKING_SPEED_KMH: f64 = 5.0;

/// Great-circle distance in kilometres (haversine).
pub fn distance_km(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Minutes on foot at the fixed walking speed, rounded to the nearest minute.
pub fn walking_minutes(distance_km: f64) -> u64 {
    (distance_km / WALKING_SPEED_KMH * 60.0).round().max(0.0) as u64
}

/// "<1 min", "12 min walk", "1h 5m walk" or "2h walk". Must stay in step with
/// `walkingTime` in the map template.
pub fn format_walking_time(distance_km: f64) -> String {
    let minutes = walking_minutes(distance_km);
    if minutes < 1 {
        "<1 min".to_string()
    } else if minutes < 60 {
        format!("{} min walk", minutes)
    } else {
        let (h, m) = (minutes / 60, minutes % 60);
        if m > 0 {
            format!("{}h {}m walk", h, m)
        } else {
            format!("{}h walk", h)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GION: Coordinates = Coordinates {
        lat: 35.0037,
        lng: 135.7788,
    };
    const KYOTO_STATION: Coordinates = Coordinates {
        lat: 34.9858,
        lng: 135.7588,
    };

    #[test]
    fn zero_for_same_point() {
        assert_eq!(distance_km(GION, GION), 0.0);
        assert_eq!(distance_km(KYOTO_STATION, KYOTO_STATION), 0.0);
    }

    #[test]
    fn symmetric() {
        let pairs = [
            (GION, KYOTO_STATION),
            (Coordinates::new(-33.86, 151.21), Coordinates::new(51.5, -0.12)),
            (Coordinates::new(0.0, 179.9), Coordinates::new(0.0, -179.9)),
        ];
        for (a, b) in pairs {
            assert_eq!(distance_km(a, b), distance_km(b, a));
        }
    }

    #[test]
    fn known_distance() {
        let d = distance_km(GION, KYOTO_STATION);
        assert!((d - 2.71).abs() < 0.05, "got {}", d);
    }

    #[test]
    fn walking_time_formats() {
        assert_eq!(format_walking_time(0.0), "<1 min");
        assert_eq!(format_walking_time(0.04), "<1 min");
        assert_eq!(format_walking_time(1.0), "12 min walk");
        assert_eq!(format_walking_time(5.0), "1h walk");
        assert_eq!(format_walking_time(5.5), "1h 6m walk");
    }
}
