use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::StudyImage;

pub fn insert_image(conn: &Connection, image: &StudyImage) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO images
            (id, study_id, blob_ref, slice_index, raw_caption, enhanced_caption, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            image.id.to_string(),
            image.study_id.to_string(),
            image.blob_ref,
            image.slice_index,
            image.raw_caption,
            image.enhanced_caption,
            image.created_at,
        ],
    )?;
    Ok(())
}

/// Slices for one study in slice order — the order captions are aggregated in.
pub fn list_images_for_study(
    conn: &Connection,
    study_id: &Uuid,
) -> Result<Vec<StudyImage>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, study_id, blob_ref, slice_index, raw_caption, enhanced_caption, created_at
         FROM images WHERE study_id = ?1 ORDER BY slice_index ASC",
    )?;

    let rows = stmt.query_map(params![study_id.to_string()], image_from_row)?;

    let mut images = Vec::new();
    for row in rows {
        images.push(row?);
    }
    Ok(images)
}

pub fn update_image_captions(
    conn: &Connection,
    id: &Uuid,
    raw_caption: &str,
    enhanced_caption: Option<&str>,
) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE images SET raw_caption = ?2, enhanced_caption = ?3 WHERE id = ?1",
        params![id.to_string(), raw_caption, enhanced_caption],
    )?;
    if affected == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "image".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

fn image_from_row(row: &rusqlite::Row<'_>) -> Result<StudyImage, rusqlite::Error> {
    Ok(StudyImage {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
        study_id: Uuid::parse_str(&row.get::<_, String>(1)?).unwrap_or_default(),
        blob_ref: row.get(2)?,
        slice_index: row.get(3)?,
        raw_caption: row.get(4)?,
        enhanced_caption: row.get(5)?,
        created_at: row.get::<_, DateTime<Utc>>(6)?,
    })
}
