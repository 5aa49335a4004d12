use serde::{Deserialize, Serialize};

/// Author of a post, identified by public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Hex-encoded public key
    pub pubkey: String,
}

/// A video post in the social feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Post id, assigned on publish when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Content locator of the video
    pub magnet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub author: Author,
    /// Unix timestamp (ms), assigned on publish when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    /// Hex-encoded ed25519 signature over the post content hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl Post {
    /// Create a minimal post
    pub fn new(magnet: impl Into<String>, author: Author) -> Self {
        Self {
            id: None,
            magnet: magnet.into(),
            title: None,
            description: None,
            tags: Vec::new(),
            author,
            created_at: None,
            sig: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Whether any of the given tags is attached to this post
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.iter().any(|own| own.eq_ignore_ascii_case(t)))
    }

    /// Searchable text: title, description and tags
    pub fn searchable_text(&self) -> String {
        let mut text = String::new();
        for part in [self.title.as_deref(), self.description.as_deref()]
            .into_iter()
            .flatten()
        {
            text.push_str(part);
            text.push(' ');
        }
        for tag in &self.tags {
            text.push_str(tag);
            text.push(' ');
        }
        text
    }
}

/// A moderation report filed against a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub post_id: String,
    pub reason: String,
    pub created_at: u64,
}

/// A blocked author
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub pubkey: String,
    pub created_at: u64,
}

/// Options for querying the feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedFilter {
    /// Keep only posts carrying at least one of these tags (empty = all)
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Author {
        Author { name: "A".to_string(), pubkey: "a".to_string() }
    }

    #[test]
    fn test_post_json_uses_camel_case() {
        let mut post = Post::new("magnet:?xt=urn:btih:p1", author()).with_id("p1");
        post.created_at = Some(1700000000000);

        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(json["createdAt"], 1700000000000u64);
        assert_eq!(json["author"]["pubkey"], "a");
        assert!(json.get("sig").is_none());
    }

    #[test]
    fn test_post_optional_fields_default() {
        let json = r#"{"magnet":"magnet:?xt=urn:btih:p1","author":{"pubkey":"a"}}"#;
        let post: Post = serde_json::from_str(json).unwrap();
        assert!(post.id.is_none());
        assert!(post.tags.is_empty());
        assert_eq!(post.author.name, "");
    }

    #[test]
    fn test_has_any_tag_is_case_insensitive() {
        let post = Post::new("m", author()).with_tags(["Cats", "music"]);
        assert!(post.has_any_tag(&["cats".to_string()]));
        assert!(!post.has_any_tag(&["dogs".to_string()]));
        assert!(!post.has_any_tag(&[]));
    }

    #[test]
    fn test_searchable_text() {
        let post = Post::new("m", author()).with_title("Sunset").with_tags(["beach"]);
        let text = post.searchable_text();
        assert!(text.contains("Sunset"));
        assert!(text.contains("beach"));
    }
}
