//! A trivial key/value [`StateMachine`]: a minimal concrete user module exercising the
//! host's actual command/query/apply path, used by `rsm-core`'s test suite.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use rsm_core::collaborators::CommandOutcome;
use rsm_core::collaborators::InfoOutcome;
use rsm_core::collaborators::InitOutcome;
use rsm_core::collaborators::StateMachine;
use rsm_core::collaborators::StopReason;
use rsm_core::Revision;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum KvCommand {
    Put { key: String, value: String },
    Delete { key: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KvQuery {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum KvReply {
    Put { previous: Option<String> },
    Deleted { previous: Option<String> },
    Value(Option<String>),
}

/// Holds no data of its own between calls; `Data` is `()` throughout.
#[derive(Default)]
pub struct KvStateMachine;

#[async_trait]
impl StateMachine for KvStateMachine {
    type Command = KvCommand;
    type Query = KvQuery;
    type Reply = KvReply;
    type State = HashMap<String, String>;
    type Data = ();

    async fn init(&self, _name: &str, _args: &[u8]) -> InitOutcome<Self::State, Self::Data> {
        InitOutcome::Started(HashMap::new(), ())
    }

    fn handle_command(
        &self,
        _cmd: &Self::Command,
        _applied_rev: Revision,
        _state: &mut Self::State,
        data: Self::Data,
    ) -> CommandOutcome<Self::Reply, Self::Data> {
        CommandOutcome::Apply(data)
    }

    async fn apply_command(
        &self,
        cmd: Self::Command,
        _entry_rev: Revision,
        _applied_rev: Revision,
        state: &mut Self::State,
        data: Self::Data,
    ) -> (Self::Reply, Self::Data) {
        let reply = match cmd {
            KvCommand::Put { key, value } => KvReply::Put {
                previous: state.insert(key, value),
            },
            KvCommand::Delete { key } => KvReply::Deleted {
                previous: state.remove(&key),
            },
        };
        (reply, data)
    }

    async fn handle_query(
        &self,
        query: Self::Query,
        _applied_rev: Revision,
        state: &Self::State,
        data: Self::Data,
    ) -> (Self::Reply, Self::Data) {
        (KvReply::Value(state.get(&query.key).cloned()), data)
    }

    fn handle_info(
        &self,
        _message: &[u8],
        _applied_rev: Revision,
        _state: &mut Self::State,
        data: Self::Data,
    ) -> InfoOutcome<Self::Data> {
        InfoOutcome::NoReply(data)
    }

    async fn terminate(&self, _reason: StopReason, _applied_rev: Revision, _state: Self::State, _data: Self::Data) {}
}
