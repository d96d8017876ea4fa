//! Hospital finder panel. Independent of any consultation.

use serde::Serialize;

pub const DEFAULT_CITY: &str = "Lahore";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HospitalMarker {
    pub name: &'static str,
    pub lat: f64,
    pub lon: f64,
}

const LAHORE: &[HospitalMarker] = &[
    HospitalMarker { name: "Mayo Hospital", lat: 31.5716, lon: 74.3106 },
    HospitalMarker { name: "Services Hospital", lat: 31.5406, lon: 74.3358 },
    HospitalMarker { name: "Jinnah Hospital", lat: 31.4843, lon: 74.2987 },
    HospitalMarker { name: "Shaukat Khanum Memorial Cancer Hospital", lat: 31.4486, lon: 74.2644 },
];

const KARACHI: &[HospitalMarker] = &[
    HospitalMarker { name: "Aga Khan University Hospital", lat: 24.8925, lon: 67.0746 },
    HospitalMarker { name: "Jinnah Postgraduate Medical Centre", lat: 24.8515, lon: 67.0444 },
    HospitalMarker { name: "Civil Hospital Karachi", lat: 24.8594, lon: 67.0104 },
];

const ISLAMABAD: &[HospitalMarker] = &[
    HospitalMarker { name: "Pakistan Institute of Medical Sciences", lat: 33.7035, lon: 73.0510 },
    HospitalMarker { name: "Shifa International Hospital", lat: 33.6782, lon: 73.0690 },
    HospitalMarker { name: "Polyclinic Hospital", lat: 33.7189, lon: 73.0811 },
];

#[derive(Debug, Clone, Serialize)]
pub struct MapPanel {
    pub city: String,
    pub embed_url: String,
    /// Known hospitals for the city; empty for cities without static data
    pub markers: Vec<HospitalMarker>,
}

/// Map panel for `city`, or `None` when the city is blank
pub fn hospital_map(city: &str) -> Option<MapPanel> {
    let city = city.trim();
    if city.is_empty() {
        return None;
    }

    let markers = match city.to_lowercase().as_str() {
        "lahore" => LAHORE.to_vec(),
        "karachi" => KARACHI.to_vec(),
        "islamabad" => ISLAMABAD.to_vec(),
        _ => Vec::new(),
    };

    Some(MapPanel {
        city: city.to_string(),
        embed_url: embed_url(city),
        markers,
    })
}

fn embed_url(city: &str) -> String {
    format!(
        "https://maps.google.com/maps?q=hospital+near+{}&output=embed",
        urlencoding::encode(city)
    )
}
