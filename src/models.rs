use diesel::prelude::*;

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = crate::schema::labeled_samples)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LabeledSample {
    pub id: i32,
    pub dsid: i64,
    pub label: String,
    /// bincode-serialized `Vec<f32>`.
    pub feature: Vec<u8>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::labeled_samples)]
pub struct NewLabeledSample<'a> {
    pub dsid: i64,
    pub label: &'a str,
    pub feature: Vec<u8>,
}
