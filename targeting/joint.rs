use crate::data::CategoricalColumn;

/// Separator between per-column levels inside a joint treatment label.
/// Level names are not expected to contain it.
pub const JOINT_SEPARATOR: &str = "_&_";

/// The joint label of one treatment assignment, e.g. `["1", "a"]` -> `"1_&_a"`.
pub fn joint_label<S: AsRef<str>>(levels: &[S]) -> String {
    let mut label = String::new();
    for (i, level) in levels.iter().enumerate() {
        if i > 0 {
            label.push_str(JOINT_SEPARATOR);
        }
        label.push_str(level.as_ref());
    }
    label
}

/// Collapses the treatment columns into one categorical column of joint labels.
///
/// A row with a missing value in any treatment column is missing in the output.
/// All columns must have the same length.
pub fn joint_treatment(columns: &[CategoricalColumn]) -> CategoricalColumn {
    let n = columns.first().map_or(0, |c| c.len());
    CategoricalColumn::from_values((0..n).map(|row| {
        columns
            .iter()
            .map(|column| column.value(row))
            .collect::<Option<Vec<&str>>>()
            .map(|levels| joint_label(&levels))
    }))
}
