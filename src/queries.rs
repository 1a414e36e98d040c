/// Queries that operate on the labeled sample table;
/// queries related to the database itself (e.g. pragmas, migrations)
/// are handled in the db module.

use diesel::prelude::*;
use diesel::SqliteConnection;

use crate::models::{LabeledSample, NewLabeledSample};

// SQLite caps bound parameters per statement; each row binds three.
const INSERT_CHUNK_ROWS: usize = 1000;

/// Inserts all rows in a single transaction: either every row lands or none do.
pub fn insert_samples(samples: &[NewLabeledSample], connection: &mut SqliteConnection) -> diesel::QueryResult<usize>
{
   use crate::schema::labeled_samples;

   connection.transaction(|connection| {
      let mut inserted = 0;
      for chunk in samples.chunks(INSERT_CHUNK_ROWS) {
         inserted += diesel::insert_into(labeled_samples::table)
            .values(chunk)
            .execute(connection)?;
      }
      Ok(inserted)
   })
}

/// All samples for `dsid`, in insertion order.
pub fn get_samples_by_dsid(dsid: i64, connection: &mut SqliteConnection) -> diesel::QueryResult<Vec<LabeledSample>>
{
   use crate::schema::labeled_samples;

   labeled_samples::table
      .filter(labeled_samples::dsid.eq(dsid))
      .order(labeled_samples::id.asc())
      .select(LabeledSample::as_select())
      .load(connection)
}

pub fn count_samples_by_dsid(dsid: i64, connection: &mut SqliteConnection) -> diesel::QueryResult<i64>
{
   use crate::schema::labeled_samples;

   labeled_samples::table
      .filter(labeled_samples::dsid.eq(dsid))
      .count()
      .get_result(connection)
}

pub fn delete_all_samples(connection: &mut SqliteConnection) -> diesel::QueryResult<usize>
{
   use crate::schema::labeled_samples;

   diesel::delete(labeled_samples::table).execute(connection)
}
