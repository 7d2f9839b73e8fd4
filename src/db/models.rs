use serde::Serialize;

/// One stored collection, as listed without loading its songs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub name: String,
    pub songs: i64,
    pub chords: i64,
    pub notes: i64,
    pub updated_at: String,
}

/// Song row metadata for listings; the encoded body stays in the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongRow {
    pub position: i64,
    pub filepath: String,
    pub midi_url: String,
    pub title: String,
    pub composer: String,
    pub num_chords: i64,
    pub num_notes: i64,
}
