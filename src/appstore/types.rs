use serde::Deserialize;

/// One page of a JSON:API collection
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub links: Option<PageLinks>,
}

impl<T> Page<T> {
    pub fn next(&self) -> Option<&str> {
        self.links.as_ref().and_then(|l| l.next.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct PageLinks {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerReview {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub attributes: Option<CustomerReviewAttributes>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomerReviewAttributes {
    pub rating: Option<i64>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub reviewer_nickname: Option<String>,
    pub created_date: Option<String>,
    pub territory: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppStoreVersion {
    #[serde(default)]
    pub attributes: Option<AppStoreVersionAttributes>,
    #[serde(default)]
    pub relationships: Option<AppStoreVersionRelationships>,
}

impl AppStoreVersion {
    pub fn platform(&self) -> Option<&str> {
        self.attributes.as_ref()?.platform.as_deref()
    }

    pub fn version_string(&self) -> Option<&str> {
        self.attributes.as_ref()?.version_string.as_deref()
    }

    /// Link to this version's customer review listing
    pub fn reviews_link(&self) -> Option<&str> {
        self.relationships
            .as_ref()?
            .customer_reviews
            .as_ref()?
            .links
            .as_ref()?
            .related
            .as_deref()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppStoreVersionAttributes {
    pub platform: Option<String>,
    pub version_string: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppStoreVersionRelationships {
    pub customer_reviews: Option<Relationship>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Relationship {
    pub links: Option<RelationshipLinks>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RelationshipLinks {
    pub related: Option<String>,
}
