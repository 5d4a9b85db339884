//! In-memory example catalog shared by unit tests.

use rusqlite::Connection;

use crate::{
    config::CatalogConfig,
    database::Database,
    schema::SchemaDefinition,
    value::{Row, SqlValue},
};

pub const SOURCE: &str = "2MASS J13571237+1428398";

pub fn empty_database() -> Database {
    let conn = Connection::open_in_memory().expect("in-memory db");
    SchemaDefinition::example().apply(&conn).expect("apply schema");
    Database::from_connection(conn, CatalogConfig::default()).expect("open database")
}

/// Example catalog plus a lookup table with no link to any source.
pub fn unlinked_database() -> Database {
    let conn = Connection::open_in_memory().expect("in-memory db");
    SchemaDefinition::example()
        .table("CREATE TABLE Regimes (regime TEXT PRIMARY KEY)")
        .apply(&conn)
        .expect("apply schema");
    let db = Database::from_connection(conn, CatalogConfig::default()).expect("open database");
    populate(&db);
    db.table("Regimes")
        .expect("regimes")
        .insert(&[Row::new().with("regime", "optical")])
        .expect("insert regime");
    db
}

pub fn example_database() -> Database {
    let db = empty_database();
    populate(&db);
    db
}

pub fn populate(db: &Database) {
    let insert = |table: &str, rows: Vec<Row>| {
        db.table(table)
            .expect(table)
            .insert(&rows)
            .unwrap_or_else(|err| panic!("insert {table}: {err}"));
    };

    insert(
        "Publications",
        vec![
            Row::new()
                .with("name", "Schm10")
                .with("bibcode", "2010AJ....139.1808S")
                .with("doi", "10.1088/0004-6256/139/5/1808")
                .with("description", "Colors and Kinematics of L Dwarfs From the Sloan Digital Sky Survey"),
            Row::new()
                .with("name", "Cutr12")
                .with("bibcode", "2012yCat.2311....0C")
                .with("doi", SqlValue::Null)
                .with("description", "WISE All-Sky Data Release"),
        ],
    );
    insert(
        "Telescopes",
        vec![Row::new().with("name", "WISE").with("reference", SqlValue::Null)],
    );
    insert(
        "Sources",
        vec![Row::new()
            .with("source", SOURCE)
            .with("ra", 209.301675)
            .with("dec", 14.477722)
            .with("shortname", "1357+1428")
            .with("reference", "Schm10")
            .with("comments", SqlValue::Null)],
    );
    insert(
        "Names",
        vec![
            Row::new().with("source", SOURCE).with("other_name", SOURCE),
            Row::new()
                .with("source", SOURCE)
                .with("other_name", "SDSS J135712.40+142839.8"),
        ],
    );
    insert(
        "Photometry",
        vec![
            Row::new()
                .with("source", SOURCE)
                .with("band", "WISE_W1")
                .with("ucd", "phot.mag;em.IR.3-4um")
                .with("magnitude", 13.348)
                .with("magnitude_error", 0.025)
                .with("telescope", "WISE")
                .with("reference", "Cutr12"),
            Row::new()
                .with("source", SOURCE)
                .with("band", "WISE_W2")
                .with("ucd", "phot.mag;em.IR.4-8um")
                .with("magnitude", 12.99)
                .with("magnitude_error", 0.028)
                .with("telescope", "WISE")
                .with("reference", "Cutr12"),
        ],
    );
}
