//! Utilidades compartidas por los tests unitarios

use serde_json::Value;

use crate::model::Track;

pub(crate) fn track_json(encoded: &str, title: &str) -> Value {
    serde_json::json!({
        "encoded": encoded,
        "info": {
            "identifier": "dQw4w9WgXcQ",
            "isSeekable": true,
            "author": "RickAstleyVEVO",
            "length": 212000,
            "isStream": false,
            "position": 0,
            "title": title,
            "uri": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "artworkUrl": null,
            "isrc": null,
            "sourceName": "youtube"
        },
        "pluginInfo": {},
        "userData": {}
    })
}

pub(crate) fn track(encoded: &str, title: &str) -> Track {
    serde_json::from_value(track_json(encoded, title)).expect("track de prueba válido")
}
