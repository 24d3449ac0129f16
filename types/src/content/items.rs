use crate::content::message::MessageItem;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum Item {
    #[serde(rename = "message")]
    Message(MessageItem),
}

impl Item {
    pub fn id(&self) -> Option<&str> {
        match self {
            Item::Message(message) => message.id(),
        }
    }
}


#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ItemStatus {
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "incomplete")]
    Incomplete,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct _Item {
    /// The unique ID of the item, Optional for client events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The status of the item: "completed", "in_progress", "incomplete"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
}
