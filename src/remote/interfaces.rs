use serde::Serialize;

use crate::auth::AuthContext;
use crate::collector::CommandRecord;
use crate::process::ProcessSnapshot;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProcessesPayload<'a> {
    pub processes: &'a [ProcessSnapshot],
    pub auth: Option<&'a AuthContext>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommandsPayload<'a> {
    pub commands: &'a [CommandRecord],
    pub auth: Option<&'a AuthContext>,
}
