//! Sequential human-readable student identifiers (`CAP-ST-07`).

use sqlx::SqliteConnection;
use uuid::Uuid;

const MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
pub struct IdentifierGenerator {
    prefix: String,
    max_attempts: u32,
}

impl IdentifierGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn format(&self, sequence: u64) -> String {
        format!("{}-{:02}", self.prefix, sequence)
    }

    /// Numeric suffix of an identifier produced by this generator.
    pub fn parse_sequence(&self, identifier: &str) -> Option<u64> {
        let suffix = identifier.strip_prefix(&self.prefix)?.strip_prefix('-')?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        suffix.parse().ok()
    }

    pub fn random_fallback(&self) -> String {
        let suffix: String = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
        format!("{}-{}", self.prefix, suffix)
    }

    /// Next free identifier.
    ///
    /// Must run inside the transaction that inserts the student, after that
    /// transaction holds the write lock, so concurrent registrations cannot
    /// observe the same predecessor.
    pub async fn next(&self, conn: &mut SqliteConnection) -> Result<String, sqlx::Error> {
        let last: Option<String> =
            sqlx::query_scalar(r#"SELECT "student_id" FROM "students" ORDER BY "id" DESC LIMIT 1"#)
                .fetch_optional(&mut *conn)
                .await?;

        let mut sequence = match last.as_deref().map(|id| (id, self.parse_sequence(id))) {
            None => 1,
            Some((_, Some(previous))) => previous + 1,
            Some((id, None)) => {
                tracing::debug!(last_id = id, "last student id has no numeric suffix");
                let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "students""#)
                    .fetch_one(&mut *conn)
                    .await?;
                count.max(0) as u64 + 1
            }
        };

        for _ in 0..self.max_attempts {
            let candidate = self.format(sequence);
            if !identifier_taken(conn, &candidate).await? {
                return Ok(candidate);
            }
            tracing::debug!(candidate = %candidate, "student id collision, retrying");
            sequence += 1;
        }

        loop {
            let candidate = self.random_fallback();
            if !identifier_taken(conn, &candidate).await? {
                tracing::warn!(
                    candidate = %candidate,
                    attempts = self.max_attempts,
                    "sequential student ids exhausted, using random suffix"
                );
                return Ok(candidate);
            }
        }
    }
}

async fn identifier_taken(
    conn: &mut SqliteConnection,
    identifier: &str,
) -> Result<bool, sqlx::Error> {
    let existing: Option<i64> =
        sqlx::query_scalar(r#"SELECT "id" FROM "students" WHERE "student_id" = ?"#)
            .bind(identifier)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(existing.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_parsed_suffix() {
        let generator = IdentifierGenerator::new("CAP-ST");
        let previous = generator.parse_sequence("CAP-ST-07").unwrap();
        assert_eq!(generator.format(previous + 1), "CAP-ST-08");
    }

    #[test]
    fn pads_to_two_digits_and_grows() {
        let generator = IdentifierGenerator::new("CAP-ST");
        assert_eq!(generator.format(1), "CAP-ST-01");
        assert_eq!(generator.format(100), "CAP-ST-100");
    }

    #[test]
    fn rejects_foreign_or_malformed_ids() {
        let generator = IdentifierGenerator::new("CAP-ST");
        assert_eq!(generator.parse_sequence("STU001"), None);
        assert_eq!(generator.parse_sequence("CAP-ST-"), None);
        assert_eq!(generator.parse_sequence("CAP-ST-1A2B3C4D"), None);
        assert_eq!(generator.parse_sequence("CAP-STX-07"), None);
    }

    #[test]
    fn fallback_keeps_prefix() {
        let generator = IdentifierGenerator::new("CAP-ST");
        let id = generator.random_fallback();
        assert!(id.starts_with("CAP-ST-"));
        assert_eq!(id.len(), "CAP-ST-".len() + 8);
        assert_eq!(generator.parse_sequence(&id).is_some(), id[7..].bytes().all(|b| b.is_ascii_digit()));
    }
}
