use crate::platform::types;

/// Map an octocrab issue to our platform issue type.
pub fn map_issue(issue: &octocrab::models::issues::Issue) -> types::Issue {
    types::Issue {
        number: issue.number,
        title: issue.title.clone(),
        body: issue.body.clone().unwrap_or_default(),
        url: issue.html_url.to_string(),
    }
}

pub fn map_pull_request(pr: &octocrab::models::pulls::PullRequest) -> types::PullRequest {
    types::PullRequest {
        number: pr.number,
        url: pr
            .html_url
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_default(),
    }
}

/// Pull the first GraphQL error message out of a response, if any.
pub fn graphql_error(response: &serde_json::Value) -> Option<String> {
    response
        .get("errors")
        .and_then(|e| e.as_array())
        .and_then(|errors| errors.first())
        .map(|e| {
            e.get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown GraphQL error")
                .to_string()
        })
}

/// Find the board item id of a piece of content on a given project.
pub fn project_item_id(response: &serde_json::Value, content: &str, project_id: &str) -> Option<String> {
    response
        .pointer(&format!("/data/repository/{content}/projectItems/nodes"))
        .and_then(|n| n.as_array())?
        .iter()
        .find(|item| item.pointer("/project/id").and_then(|id| id.as_str()) == Some(project_id))
        .and_then(|item| item.get("id"))
        .and_then(|id| id.as_str())
        .map(str::to_string)
}
