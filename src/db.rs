use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::segment::emitter::TopicRecord;
use crate::segment::slugify;

pub type Fields = Map<String, Value>;

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            path       TEXT PRIMARY KEY,
            parent     TEXT NOT NULL,
            doc_id     TEXT NOT NULL,
            fields     TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(parent);
        ",
    )?;
    Ok(())
}

// ── Key paths ──

pub fn subject_path(subject: &str) -> String {
    format!("subjects/{}", slugify(subject))
}

pub fn chapter_path(subject: &str, chapter: &str) -> String {
    format!("{}/chapters/{}", subject_path(subject), slugify(chapter))
}

pub fn topics_path(subject: &str, chapter: &str) -> String {
    format!("{}/topics", chapter_path(subject, chapter))
}

pub fn topic_path(subject: &str, chapter: &str, topic_id: &str) -> String {
    format!("{}/{}", topics_path(subject, chapter), topic_id)
}

/// `a/b/c/d` → (`a/b/c`, `d`).
fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, id)) => (parent, id),
        None => ("", path),
    }
}

// ── Documents ──

/// Write a document. Without `merge` the field map is replaced. With it
/// each top-level field is applied on its own: a `null` value removes the
/// key, anything else overwrites it whole. Nested objects are stored as
/// given, nulls included; they are never merged into what was there.
pub fn set_document(conn: &Connection, path: &str, fields: &Fields, merge: bool) -> Result<()> {
    let (parent, doc_id) = split_path(path);
    if !merge {
        conn.execute(
            "INSERT INTO documents (path, parent, doc_id, fields, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(path) DO UPDATE SET fields = excluded.fields, updated_at = excluded.updated_at",
            params![path, parent, doc_id, serde_json::to_string(fields)?],
        )?;
        return Ok(());
    }

    // A new document gets the non-null fields as they are.
    let initial: Fields = fields
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut args: Vec<String> = vec![
        path.to_string(),
        parent.to_string(),
        doc_id.to_string(),
        serde_json::to_string(&initial)?,
    ];
    let mut expr = String::from("documents.fields");
    for (key, value) in fields {
        args.push(json_key(key));
        let key_arg = args.len();
        if value.is_null() {
            expr = format!("json_remove({}, ?{})", expr, key_arg);
        } else {
            args.push(serde_json::to_string(value)?);
            expr = format!("json_set({}, ?{}, json(?{}))", expr, key_arg, args.len());
        }
    }

    let sql = format!(
        "INSERT INTO documents (path, parent, doc_id, fields, updated_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))
         ON CONFLICT(path) DO UPDATE SET fields = {}, updated_at = excluded.updated_at",
        expr
    );
    conn.execute(&sql, params_from_iter(args.iter()))?;
    Ok(())
}

/// JSON path for one top-level key. Quoted, so keys may contain `.`.
fn json_key(key: &str) -> String {
    format!("$.\"{}\"", key)
}

pub fn get_document(conn: &Connection, path: &str) -> Result<Option<Fields>> {
    let raw: Option<String> = conn
        .query_row("SELECT fields FROM documents WHERE path = ?1", [path], |r| r.get(0))
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

/// Direct children of a collection, in the order they were first written.
pub fn stream_children(conn: &Connection, collection: &str) -> Result<Vec<(String, Fields)>> {
    let mut stmt =
        conn.prepare("SELECT doc_id, fields FROM documents WHERE parent = ?1 ORDER BY rowid")?;
    let rows = stmt
        .query_map([collection], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, raw)| -> Result<(String, Fields)> { Ok((id, serde_json::from_str(&raw)?)) })
        .collect()
}

/// Delete every document below `collection`, nested collections included.
pub fn delete_children(conn: &Connection, collection: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM documents
         WHERE parent = ?1 OR substr(parent, 1, length(?1) + 1) = ?1 || '/'",
        [collection],
    )?)
}

/// Check-and-set on one document: stamp `claim_key` with `now` unless
/// `done_key` is already present or someone else holds a claim newer than
/// `stale_before`. Returns whether the claim was taken.
///
/// Timestamps are RFC 3339 UTC strings, so they compare as text.
pub fn claim_document(
    conn: &Connection,
    path: &str,
    claim_key: &str,
    done_key: &str,
    now: &str,
    stale_before: &str,
) -> Result<bool> {
    let claim = format!("$.{}", claim_key);
    let done = format!("$.{}", done_key);
    let changed = conn.execute(
        "UPDATE documents
         SET fields = json_set(fields, ?1, ?3), updated_at = datetime('now')
         WHERE path = ?4
           AND json_extract(fields, ?2) IS NULL
           AND (json_extract(fields, ?1) IS NULL OR json_extract(fields, ?1) < ?5)",
        params![claim, done, now, path, stale_before],
    )?;
    Ok(changed == 1)
}

pub fn release_claim(conn: &Connection, path: &str, claim_key: &str) -> Result<()> {
    conn.execute(
        "UPDATE documents SET fields = json_remove(fields, ?1) WHERE path = ?2",
        params![format!("$.{}", claim_key), path],
    )?;
    Ok(())
}

// ── Topics ──

/// Store a split chapter: subject and chapter documents plus one topic
/// document per record, `topic1..topicN` in emission order. Topics from an
/// earlier split of the same chapter are replaced.
pub fn save_topics(
    conn: &Connection,
    subject: &str,
    chapter: &str,
    class_name: &str,
    source_file: &str,
    records: &[TopicRecord],
    created_at: &str,
) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;

    set_document(&tx, &subject_path(subject), &object(json!({ "name": subject })), true)?;
    set_document(
        &tx,
        &chapter_path(subject, chapter),
        &object(json!({
            "name": chapter,
            "subject": subject,
            "class_name": class_name,
            "source_file": source_file,
            "topic_count": records.len(),
            "created_at": created_at,
        })),
        true,
    )?;

    let collection = topics_path(subject, chapter);
    delete_children(&tx, &collection)?;
    for (i, r) in records.iter().enumerate() {
        let topic_id = format!("topic{}", i + 1);
        set_document(
            &tx,
            &format!("{}/{}", collection, topic_id),
            &object(json!({
                "title": r.title(),
                "filename": r.filename,
                "content": r.text,
                "pages": r.pages,
                "created_at": created_at,
            })),
            false,
        )?;
    }

    tx.commit()?;
    Ok(records.len())
}

pub fn object(v: Value) -> Fields {
    match v {
        Value::Object(m) => m,
        _ => Fields::new(),
    }
}

/// A stored topic, with the ids of the documents above it.
pub struct TopicEntry {
    pub path: String,
    pub subject_id: String,
    pub chapter_id: String,
    pub topic_id: String,
    pub class_name: Option<String>,
    pub fields: Fields,
}

impl TopicEntry {
    pub fn title(&self) -> String {
        self.fields
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(self.topic_id.as_str())
            .to_string()
    }

    pub fn content(&self) -> &str {
        self.fields.get("content").and_then(Value::as_str).unwrap_or("").trim()
    }

    pub fn has_plan(&self) -> bool {
        self.fields.get("ai_plan_json").is_some_and(|v| !v.is_null())
    }
}

/// Walk subjects → chapters → topics, optionally narrowed to one subject
/// and/or chapter (given as names; they are slugged like the keys).
pub fn fetch_topics(
    conn: &Connection,
    subject: Option<&str>,
    chapter: Option<&str>,
) -> Result<Vec<TopicEntry>> {
    let subjects: Vec<String> = match subject {
        Some(s) => vec![slugify(s)],
        None => stream_children(conn, "subjects")?.into_iter().map(|(id, _)| id).collect(),
    };

    let mut out = Vec::new();
    for subject_id in subjects {
        let chapters_path = format!("subjects/{}/chapters", subject_id);
        let chapters: Vec<(String, Fields)> = match chapter {
            Some(c) => {
                let id = slugify(c);
                match get_document(conn, &format!("{}/{}", chapters_path, id))? {
                    Some(fields) => vec![(id, fields)],
                    None => Vec::new(),
                }
            }
            None => stream_children(conn, &chapters_path)?,
        };

        for (chapter_id, chapter_fields) in chapters {
            let class_name = chapter_fields
                .get("class_name")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            let collection = format!("{}/{}/topics", chapters_path, chapter_id);
            for (topic_id, fields) in stream_children(conn, &collection)? {
                out.push(TopicEntry {
                    path: format!("{}/{}", collection, topic_id),
                    subject_id: subject_id.clone(),
                    chapter_id: chapter_id.clone(),
                    topic_id,
                    class_name: class_name.clone(),
                    fields,
                });
            }
        }
    }
    Ok(out)
}

// ── Stats ──

pub struct Stats {
    pub subjects: usize,
    pub chapters: usize,
    pub topics: usize,
    pub planned: usize,
    pub claimed: usize,
    /// Agent outputs stored under topics.
    pub generated: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    Ok(Stats {
        subjects: count("SELECT COUNT(*) FROM documents WHERE parent = 'subjects'")?,
        chapters: count("SELECT COUNT(*) FROM documents WHERE parent LIKE 'subjects/%/chapters'")?,
        topics: count("SELECT COUNT(*) FROM documents WHERE parent LIKE 'subjects/%/topics'")?,
        planned: count(
            "SELECT COUNT(*) FROM documents
             WHERE parent LIKE 'subjects/%/topics' AND json_extract(fields, '$.ai_plan_json') IS NOT NULL",
        )?,
        claimed: count(
            "SELECT COUNT(*) FROM documents
             WHERE parent LIKE 'subjects/%/topics' AND json_extract(fields, '$.ai_plan_claim') IS NOT NULL",
        )?,
        generated: count(
            "SELECT COUNT(*) FROM documents WHERE parent LIKE 'subjects/%/topics/%/ai_generated_content'",
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn record(filename: &str, text: &str, pages: Vec<usize>) -> TopicRecord {
        TopicRecord {
            filename: filename.into(),
            document: Vec::new(),
            text: text.into(),
            pages,
        }
    }

    #[test]
    fn paths_are_slugged() {
        assert_eq!(
            topic_path("Social Studies", "Chapter  2", "topic1"),
            "subjects/Social_Studies/chapters/Chapter_2/topics/topic1"
        );
    }

    #[test]
    fn set_get_replace_and_merge() {
        let conn = mem();
        let p = "subjects/English";
        assert!(get_document(&conn, p).unwrap().is_none());

        set_document(&conn, p, &object(json!({"a": 1, "b": 2})), false).unwrap();
        set_document(&conn, p, &object(json!({"b": 3, "c": 4})), true).unwrap();
        let doc = get_document(&conn, p).unwrap().unwrap();
        assert_eq!(Value::Object(doc), json!({"a": 1, "b": 3, "c": 4}));

        set_document(&conn, p, &object(json!({"z": true})), false).unwrap();
        let doc = get_document(&conn, p).unwrap().unwrap();
        assert_eq!(Value::Object(doc), json!({"z": true}));
    }

    #[test]
    fn merge_null_removes_key() {
        let conn = mem();
        let p = "subjects/E/chapters/C/topics/topic1";
        set_document(&conn, p, &object(json!({"content": "x", "ai_plan_claim": "2026"})), false).unwrap();
        set_document(
            &conn,
            p,
            &object(json!({"ai_plan_json": {"title": "t"}, "ai_plan_claim": null})),
            true,
        )
        .unwrap();
        let doc = get_document(&conn, p).unwrap().unwrap();
        assert_eq!(Value::Object(doc), json!({"content": "x", "ai_plan_json": {"title": "t"}}));

        // Removing a key that is not there is a no-op.
        set_document(&conn, p, &object(json!({"ai_plan_claim": null})), true).unwrap();
        assert_eq!(get_document(&conn, p).unwrap().unwrap().len(), 2);
    }

    #[test]
    fn merge_stores_nested_values_whole() {
        let conn = mem();
        let p = "t/topic1";
        set_document(&conn, p, &object(json!({"plan": {"a": 1, "b": 2}})), false).unwrap();
        set_document(
            &conn,
            p,
            &object(json!({"plan": {"a": null, "c": [1, null]}, "note": "it's \"quoted\""})),
            true,
        )
        .unwrap();
        let doc = get_document(&conn, p).unwrap().unwrap();
        assert_eq!(doc["plan"], json!({"a": null, "c": [1, null]}));
        assert_eq!(doc["note"], json!("it's \"quoted\""));
    }

    #[test]
    fn merge_new_document_drops_nulls() {
        let conn = mem();
        set_document(&conn, "t/topic2", &object(json!({"a": 1, "b": null})), true).unwrap();
        let doc = get_document(&conn, "t/topic2").unwrap().unwrap();
        assert_eq!(Value::Object(doc), json!({"a": 1}));
    }

    #[test]
    fn merge_creates_missing_document() {
        let conn = mem();
        set_document(&conn, "subjects/Maths", &object(json!({"name": "Maths"})), true).unwrap();
        assert!(get_document(&conn, "subjects/Maths").unwrap().is_some());
    }

    #[test]
    fn children_in_insertion_order() {
        let conn = mem();
        for id in ["topic1", "topic2", "topic10", "topic3"] {
            set_document(&conn, &format!("c/{}", id), &Fields::new(), false).unwrap();
        }
        set_document(&conn, "c/topic2", &object(json!({"x": 1})), true).unwrap();
        set_document(&conn, "other/topic9", &Fields::new(), false).unwrap();
        let ids: Vec<String> = stream_children(&conn, "c").unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["topic1", "topic2", "topic10", "topic3"]);
    }

    #[test]
    fn save_and_walk_topics() {
        let conn = mem();
        let records = vec![
            record("01_Let_us_Sing.pdf", "sing", vec![0, 1, 2]),
            record("02_Parts_of_the_Body.pdf", "body", vec![3]),
        ];
        save_topics(&conn, "English", "Chapter 1", "Class 1", "ch1.pdf", &records, "t0").unwrap();

        let topics = fetch_topics(&conn, None, None).unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].path, "subjects/English/chapters/Chapter_1/topics/topic1");
        assert_eq!(topics[0].title(), "01_Let_us_Sing");
        assert_eq!(topics[1].content(), "body");
        assert_eq!(topics[1].class_name.as_deref(), Some("Class 1"));
        assert!(!topics[0].has_plan());

        let filtered = fetch_topics(&conn, Some("English"), Some("Chapter 1")).unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(fetch_topics(&conn, Some("English"), Some("Chapter 9")).unwrap().is_empty());
        assert!(fetch_topics(&conn, Some("Hindi"), None).unwrap().is_empty());
    }

    #[test]
    fn resplit_replaces_topics() {
        let conn = mem();
        let first = vec![
            record("01_A.pdf", "a", vec![0]),
            record("02_B.pdf", "b", vec![1]),
            record("03_C.pdf", "c", vec![2]),
        ];
        save_topics(&conn, "English", "Ch1", "", "x.pdf", &first, "t0").unwrap();
        save_topics(&conn, "English", "Ch1", "", "x.pdf", &first[..1], "t1").unwrap();
        let topics = fetch_topics(&conn, None, None).unwrap();
        assert_eq!(topics.len(), 1);
        assert!(topics[0].class_name.is_none());

        let chapter = get_document(&conn, &chapter_path("English", "Ch1")).unwrap().unwrap();
        assert_eq!(chapter["topic_count"], json!(1));
    }

    #[test]
    fn resplit_drops_content_below_topics() {
        let conn = mem();
        let records = vec![record("01_A.pdf", "a", vec![0])];
        save_topics(&conn, "English", "Ch1", "", "x.pdf", &records, "t0").unwrap();
        save_topics(&conn, "English", "Ch10", "", "y.pdf", &records, "t0").unwrap();
        let below = format!("{}/ai_generated_content/worksheet_generator", topic_path("English", "Ch1", "topic1"));
        let sibling = format!("{}/ai_generated_content/worksheet_generator", topic_path("English", "Ch10", "topic1"));
        set_document(&conn, &below, &object(json!({"content": "w"})), false).unwrap();
        set_document(&conn, &sibling, &object(json!({"content": "w"})), false).unwrap();
        assert_eq!(get_stats(&conn).unwrap().generated, 2);

        save_topics(&conn, "English", "Ch1", "", "x.pdf", &records, "t1").unwrap();
        assert!(get_document(&conn, &below).unwrap().is_none());
        assert!(get_document(&conn, &sibling).unwrap().is_some());
        assert_eq!(get_stats(&conn).unwrap().topics, 2);
    }

    #[test]
    fn claim_is_exclusive() {
        let conn = mem();
        let p = "subjects/E/chapters/C/topics/topic1";
        set_document(&conn, p, &object(json!({"content": "x"})), false).unwrap();

        let now = "2026-10-18T10:00:00Z";
        let cutoff = "2026-10-18T09:30:00Z";
        assert!(claim_document(&conn, p, "ai_plan_claim", "ai_plan_json", now, cutoff).unwrap());
        assert!(!claim_document(&conn, p, "ai_plan_claim", "ai_plan_json", now, cutoff).unwrap());

        // An old claim can be taken over.
        let later = "2026-10-18T11:00:00Z";
        let later_cutoff = "2026-10-18T10:30:00Z";
        assert!(claim_document(&conn, p, "ai_plan_claim", "ai_plan_json", later, later_cutoff).unwrap());

        release_claim(&conn, p, "ai_plan_claim").unwrap();
        let doc = get_document(&conn, p).unwrap().unwrap();
        assert!(!doc.contains_key("ai_plan_claim"));
        assert_eq!(doc["content"], json!("x"));
    }

    #[test]
    fn claim_refused_once_done() {
        let conn = mem();
        let p = "t/topic1";
        set_document(&conn, p, &object(json!({"ai_plan_json": {"title": "x"}})), false).unwrap();
        assert!(!claim_document(&conn, p, "ai_plan_claim", "ai_plan_json", "b", "a").unwrap());
        assert!(!claim_document(&conn, "t/missing", "ai_plan_claim", "ai_plan_json", "b", "a").unwrap());
    }

    #[test]
    fn stats_count_levels() {
        let conn = mem();
        let records = vec![record("01_A.pdf", "a", vec![0]), record("02_B.pdf", "b", vec![1])];
        save_topics(&conn, "English", "Ch1", "", "x.pdf", &records, "t0").unwrap();
        save_topics(&conn, "English", "Ch2", "", "y.pdf", &records[..1], "t0").unwrap();
        set_document(
            &conn,
            &topic_path("English", "Ch1", "topic2"),
            &object(json!({"ai_plan_json": {}})),
            true,
        )
        .unwrap();

        let s = get_stats(&conn).unwrap();
        assert_eq!(s.subjects, 1);
        assert_eq!(s.chapters, 2);
        assert_eq!(s.topics, 3);
        assert_eq!(s.planned, 1);
        assert_eq!(s.claimed, 0);
        assert_eq!(s.generated, 0);
    }
}
