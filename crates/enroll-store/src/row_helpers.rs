use enroll_core::{AgeCategory, Competition, Participant, User};

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a stored label into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Column list matching [`competition_from_row`].
pub const COMPETITION_COLUMNS: &str = "id, type, age_category, nr_of_participants";

pub fn competition_from_row(row: &rusqlite::Row<'_>) -> Result<Competition, StoreError> {
    let label: String = get(row, 2, "competitions", "age_category")?;
    Ok(Competition {
        id: get::<i64>(row, 0, "competitions", "id")?.into(),
        competition_type: get(row, 1, "competitions", "type")?,
        age_category: parse_enum::<AgeCategory>(&label, "competitions", "age_category")?,
        nr_of_participants: get(row, 3, "competitions", "nr_of_participants")?,
    })
}

pub fn participant_from_row(row: &rusqlite::Row<'_>) -> Result<Participant, StoreError> {
    Ok(Participant {
        id: get::<i64>(row, 0, "participants", "id")?.into(),
        name: get(row, 1, "participants", "name")?,
        age: get(row, 2, "participants", "age")?,
    })
}

pub fn user_from_row(row: &rusqlite::Row<'_>) -> Result<User, StoreError> {
    Ok(User {
        id: get::<i64>(row, 0, "users", "id")?.into(),
        user_name: get(row, 1, "users", "user_name")?,
        password: get(row, 2, "users", "password")?,
    })
}

/// Run a query and map every row through `map`.
pub fn collect_rows<T, P>(
    conn: &rusqlite::Connection,
    sql: &str,
    params: P,
    map: fn(&rusqlite::Row<'_>) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError>
where
    P: rusqlite::Params,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(map(row)?);
    }
    Ok(out)
}
