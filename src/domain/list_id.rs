/// Identifier of a mailing list.
///
/// Every list owns a subscriber table named `subscription__<id>`. The name is only ever
/// produced by [`ListId::table_name`], which is safe to splice into SQL because the id is a
/// validated positive integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct ListId(i32);

impl ListId {
    pub fn parse(id: i32) -> Result<ListId, String> {
        if id < 1 {
            return Err(String::from("Missing List ID"));
        }

        Ok(Self(id))
    }

    pub fn table_name(&self) -> String {
        format!("subscription__{}", self.0)
    }

    pub fn as_i32(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for ListId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
