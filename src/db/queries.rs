use super::models::{CollectionSummary, SongRow};
use super::{Database, DbError, Result};
use crate::collection::Collection;
use crate::song::Song;
use rusqlite::{params, OptionalExtension};

impl Database {
    /// Replace the stored collection `collection.name` with the given songs.
    ///
    /// All-or-nothing: a failure leaves the previous contents in place.
    pub fn save_collection(&self, collection: &Collection) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute("DELETE FROM collections WHERE name = ?1", params![collection.name])?;
        tx.execute(
            "INSERT INTO collections (name, updated_at) VALUES (?1, datetime('now'))",
            params![collection.name],
        )?;
        let collection_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO songs (
                    collection_id, position, filepath, midi_url, title, composer,
                    num_chords, num_notes, body
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for (position, song) in collection.songs().iter().enumerate() {
                let body = serde_json::to_string(song)?;
                stmt.execute(params![
                    collection_id,
                    position as i64,
                    song.meta.filepath,
                    song.meta.midi_url,
                    song.meta.title,
                    song.meta.composer,
                    song.num_chords() as i64,
                    song.encoded.stats.num_notes as i64,
                    body,
                ])?;
            }
        }

        tx.commit()?;
        log::info!("Saved collection {} ({} songs)", collection.name, collection.len());
        Ok(collection.len())
    }

    /// Load a whole collection in stored order.
    pub fn load_collection(&self, name: &str) -> Result<Collection> {
        let collection_id: i64 = self
            .conn
            .query_row("SELECT id FROM collections WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?
            .ok_or_else(|| DbError::NotFound(name.to_string()))?;

        let mut stmt = self
            .conn
            .prepare("SELECT body FROM songs WHERE collection_id = ?1 ORDER BY position")?;
        let bodies = stmt
            .query_map(params![collection_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let songs = bodies
            .iter()
            .map(|body| serde_json::from_str::<Song>(body))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        log::info!("Loaded collection {} ({} songs)", name, songs.len());
        Ok(Collection::with_songs(name, songs))
    }

    /// Load every stored collection, ordered by name.
    pub fn load_all(&self) -> Result<Vec<Collection>> {
        self.list_collections()?
            .iter()
            .map(|summary| self.load_collection(&summary.name))
            .collect()
    }

    pub fn list_collections(&self) -> Result<Vec<CollectionSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.name, COUNT(s.id), COALESCE(SUM(s.num_chords), 0),
                    COALESCE(SUM(s.num_notes), 0), c.updated_at
             FROM collections c
             LEFT JOIN songs s ON s.collection_id = c.id
             GROUP BY c.id
             ORDER BY c.name",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(CollectionSummary {
                    name: row.get(0)?,
                    songs: row.get(1)?,
                    chords: row.get(2)?,
                    notes: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Song listing of one collection without decoding the song bodies.
    pub fn list_songs(&self, name: &str) -> Result<Vec<SongRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.position, s.filepath, s.midi_url, s.title, s.composer, s.num_chords, s.num_notes
             FROM songs s
             JOIN collections c ON c.id = s.collection_id
             WHERE c.name = ?1
             ORDER BY s.position",
        )?;

        let rows = stmt
            .query_map(params![name], |row| {
                Ok(SongRow {
                    position: row.get(0)?,
                    filepath: row.get(1)?,
                    midi_url: row.get(2)?,
                    title: row.get(3)?,
                    composer: row.get(4)?,
                    num_chords: row.get(5)?,
                    num_notes: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a collection and its songs. Returns false if it did not exist.
    pub fn delete_collection(&self, name: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM collections WHERE name = ?1", params![name])?;
        if deleted > 0 {
            log::info!("Deleted collection {}", name);
        }
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::{encode, EncodeOptions, NoteEvent, SongMeta};

    fn song(path: &str, pitches: &[u8]) -> Song {
        let events: Vec<NoteEvent> = pitches
            .iter()
            .enumerate()
            .map(|(i, &p)| NoteEvent::new(i as u32 * 240, p, 240, 0))
            .collect();
        Song {
            meta: SongMeta {
                filepath: path.into(),
                midi_url: path.into(),
                title: format!("Title of {path}"),
                ..Default::default()
            },
            ticks_per_quarter: 480,
            time_signatures: vec![],
            key_signatures: vec![],
            meta_text: "0 TrackName \"x\"\n".into(),
            encoded: encode(&events, 1, &EncodeOptions::default()).unwrap(),
        }
    }

    fn collection(name: &str, songs: Vec<Song>) -> Collection {
        Collection::with_songs(name, songs)
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let original = collection("bach", vec![song("a.mid", &[60, 62, 64]), song("b.mid", &[50])]);
        assert_eq!(db.save_collection(&original).unwrap(), 2);

        let loaded = db.load_collection("bach").unwrap();
        assert_eq!(loaded.name, "bach");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.songs()[0].meta, original.songs()[0].meta);
        assert_eq!(loaded.songs()[0].encoded, original.songs()[0].encoded);
        assert_eq!(loaded.songs()[1].meta_text, original.songs()[1].meta_text);
    }

    #[test]
    fn test_save_replaces_previous_contents() {
        let db = Database::open_in_memory().unwrap();
        db.save_collection(&collection("c", vec![song("a.mid", &[60]), song("b.mid", &[61])]))
            .unwrap();
        db.save_collection(&collection("c", vec![song("z.mid", &[70])])).unwrap();

        let loaded = db.load_collection("c").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.songs()[0].meta.filepath, "z.mid");
        let orphans: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 1);
    }

    #[test]
    fn test_load_missing_collection() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.load_collection("nope"), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_list_and_delete() {
        let db = Database::open_in_memory().unwrap();
        db.save_collection(&collection("b", vec![song("x.mid", &[60, 62])])).unwrap();
        db.save_collection(&collection("a", vec![])).unwrap();

        let list = db.list_collections().unwrap();
        let names: Vec<&str> = list.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!((list[0].songs, list[0].chords), (0, 0));
        assert_eq!((list[1].songs, list[1].chords, list[1].notes), (1, 2, 2));

        let songs = db.list_songs("b").unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].title, "Title of x.mid");

        assert_eq!(db.load_all().unwrap().len(), 2);
        assert!(db.delete_collection("b").unwrap());
        assert!(!db.delete_collection("b").unwrap());
        assert_eq!(db.list_collections().unwrap().len(), 1);
        assert!(db.list_songs("b").unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_body_fails_whole_load() {
        let db = Database::open_in_memory().unwrap();
        db.save_collection(&collection("c", vec![song("a.mid", &[60])])).unwrap();
        db.conn.execute("UPDATE songs SET body = '{bad'", []).unwrap();
        assert!(matches!(db.load_collection("c"), Err(DbError::Serialization(_))));
    }
}
