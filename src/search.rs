use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{PublicationRecord, SearchQuery};
use crate::error::HarvestError;

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

pub trait SearchProvider: Send + Sync {
    fn search(&self, query: &SearchQuery) -> Result<Vec<PublicationRecord>, HarvestError>;
}

/// Search backend selected from configuration.
pub enum SearchBackend {
    PubMed(PubMedSearch),
    Http(HttpSearch),
    Unconfigured,
}

impl SearchProvider for SearchBackend {
    fn search(&self, query: &SearchQuery) -> Result<Vec<PublicationRecord>, HarvestError> {
        match self {
            SearchBackend::PubMed(provider) => provider.search(query),
            SearchBackend::Http(provider) => provider.search(query),
            SearchBackend::Unconfigured => Err(HarvestError::ProviderUnavailable(
                "search provider".to_string(),
            )),
        }
    }
}

fn build_client(timeout_secs: u64) -> Result<Client, HarvestError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("lit-harvest/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| HarvestError::SearchHttp(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|err| HarvestError::SearchHttp(err.to_string()))
}

fn handle_status(
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, HarvestError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "search request failed".to_string());
    Err(HarvestError::SearchStatus { status, message })
}

/// NCBI E-utilities: `esearch` for identifiers, `efetch` for the records.
#[derive(Clone)]
pub struct PubMedSearch {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    email: Option<String>,
}

impl PubMedSearch {
    pub fn new(api_key: Option<String>, email: Option<String>) -> Result<Self, HarvestError> {
        Ok(Self {
            client: build_client(60)?,
            base_url: EUTILS_BASE.to_string(),
            api_key,
            email,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn common_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", "pubmed".to_string()), ("tool", "lit-harvest".to_string())];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        params
    }

    fn esearch(&self, query: &SearchQuery) -> Result<Vec<String>, HarvestError> {
        let mut params = self.common_params();
        params.push(("term", build_term(query)));
        params.push(("retmode", "json".to_string()));
        params.push(("retmax", query.max_results.to_string()));
        params.push(("datetype", "pdat".to_string()));
        params.push((
            "mindate",
            query.date_range.start.format("%Y/%m/%d").to_string(),
        ));
        params.push(("maxdate", query.date_range.end.format("%Y/%m/%d").to_string()));

        let response = self
            .client
            .get(format!("{}/esearch.fcgi", self.base_url))
            .query(&params)
            .send()
            .map_err(|err| HarvestError::SearchHttp(err.to_string()))?;
        let body: EsearchResponse = handle_status(response)?
            .json()
            .map_err(|err| HarvestError::SearchHttp(err.to_string()))?;
        debug!(count = body.esearchresult.idlist.len(), "esearch returned PMIDs");
        Ok(body.esearchresult.idlist)
    }

    fn efetch(&self, pmids: &[String]) -> Result<Vec<PublicationRecord>, HarvestError> {
        let mut params = self.common_params();
        params.push(("id", pmids.join(",")));
        params.push(("rettype", "abstract".to_string()));
        params.push(("retmode", "xml".to_string()));

        let response = self
            .client
            .get(format!("{}/efetch.fcgi", self.base_url))
            .query(&params)
            .send()
            .map_err(|err| HarvestError::SearchHttp(err.to_string()))?;
        let xml = handle_status(response)?
            .text()
            .map_err(|err| HarvestError::SearchHttp(err.to_string()))?;
        Ok(parse_pubmed_xml(&xml))
    }
}

impl SearchProvider for PubMedSearch {
    fn search(&self, query: &SearchQuery) -> Result<Vec<PublicationRecord>, HarvestError> {
        let pmids = self.esearch(query)?;
        if pmids.is_empty() {
            return Ok(Vec::new());
        }
        self.efetch(&pmids)
    }
}

#[derive(Debug, Deserialize)]
struct EsearchResponse {
    #[serde(default)]
    esearchresult: EsearchResult,
}

#[derive(Debug, Default, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

/// PubMed search term for a topic restricted to publication types.
pub fn build_term(query: &SearchQuery) -> String {
    let topic = format!("({})", query.topic.trim());
    let types = query
        .publication_types
        .iter()
        .map(|kind| kind.trim())
        .filter(|kind| !kind.is_empty())
        .map(|kind| format!("\"{kind}\"[pt]"))
        .collect::<Vec<_>>();
    if types.is_empty() {
        return topic;
    }
    format!("{topic} AND ({})", types.join(" OR "))
}

#[derive(Default)]
struct Draft {
    record: PublicationRecord,
    year: String,
    month: String,
    day: String,
    medline_date: String,
    elocation_doi: Option<String>,
    abstract_parts: Vec<String>,
    last_name: String,
    fore_name: String,
    collective_name: String,
}

impl Draft {
    fn finish(mut self) -> PublicationRecord {
        self.record.abstract_text = self.abstract_parts.join(" ");
        self.record.publication_date = pubmed_date(&self.year, &self.month, &self.day)
            .unwrap_or_else(|| self.medline_date.clone());
        if self.record.doi.is_none() {
            self.record.doi = self.elocation_doi;
        }
        self.record
    }
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Option<String> {
    element
        .try_get_attribute(name)
        .ok()
        .flatten()
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

fn within(stack: &[String], name: &str) -> bool {
    stack.iter().any(|item| item == name)
}

/// Parses an `efetch` PubmedArticleSet. Articles with missing fields are
/// kept with empty values; parsing stops at the first XML error and returns
/// what was read so far.
pub fn parse_pubmed_xml(xml: &str) -> Vec<PublicationRecord> {
    let mut records = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<Draft> = None;
    let mut id_type = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                match name.as_str() {
                    "PubmedArticle" => current = Some(Draft::default()),
                    "ArticleId" => id_type = attribute(element, "IdType").unwrap_or_default(),
                    "ELocationID" => {
                        id_type = attribute(element, "EIdType").unwrap_or_default();
                    }
                    "Author" => {
                        if let Some(draft) = current.as_mut() {
                            draft.last_name.clear();
                            draft.fore_name.clear();
                            draft.collective_name.clear();
                        }
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Ok(Event::Text(ref text)) => {
                let Some(draft) = current.as_mut() else {
                    buf.clear();
                    continue;
                };
                let text = text.unescape().unwrap_or_default().into_owned();
                apply_text(draft, &stack, &id_type, text);
            }
            Ok(Event::End(ref element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                stack.pop();
                match name.as_str() {
                    "Author" => {
                        if let Some(draft) = current.as_mut() {
                            let author = if !draft.collective_name.is_empty() {
                                draft.collective_name.clone()
                            } else if draft.fore_name.is_empty() {
                                draft.last_name.clone()
                            } else {
                                format!("{} {}", draft.fore_name, draft.last_name)
                            };
                            if !author.is_empty() {
                                draft.record.authors.push(author);
                            }
                        }
                    }
                    "PubmedArticle" => {
                        if let Some(draft) = current.take() {
                            records.push(draft.finish());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                warn!("PubMed XML parse error: {err}");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    records
}

fn apply_text(draft: &mut Draft, stack: &[String], id_type: &str, text: String) {
    let Some(leaf) = stack.last().map(String::as_str) else {
        return;
    };
    let parent = stack
        .len()
        .checked_sub(2)
        .and_then(|idx| stack.get(idx))
        .map(String::as_str)
        .unwrap_or_default();

    if within(stack, "ArticleTitle") {
        push_text(&mut draft.record.title, &text);
        return;
    }
    if within(stack, "AbstractText") {
        draft.abstract_parts.push(text);
        return;
    }
    // Reference lists repeat PMID/ArticleId for cited works.
    if within(stack, "ReferenceList") || within(stack, "CommentsCorrectionsList") {
        return;
    }

    match (parent, leaf) {
        ("MedlineCitation", "PMID") if draft.record.identifier.is_empty() => {
            draft.record.identifier = text;
        }
        ("Journal", "Title") => draft.record.journal = text,
        ("PubDate", "Year") => draft.year = text,
        ("PubDate", "Month") => draft.month = text,
        ("PubDate", "Day") => draft.day = text,
        ("PubDate", "MedlineDate") => draft.medline_date = text,
        ("Author", "LastName") => draft.last_name = text,
        ("Author", "ForeName") => draft.fore_name = text,
        ("Author", "CollectiveName") => draft.collective_name = text,
        ("MeshHeading", "DescriptorName") => draft.record.mesh_terms.push(text),
        ("ArticleIdList", "ArticleId") if id_type == "doi" && draft.record.doi.is_none() => {
            draft.record.doi = Some(text);
        }
        (_, "ELocationID") if id_type == "doi" && draft.elocation_doi.is_none() => {
            draft.elocation_doi = Some(text);
        }
        _ => {}
    }
}

fn push_text(target: &mut String, text: &str) {
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}

fn pubmed_date(year: &str, month: &str, day: &str) -> Option<String> {
    if year.is_empty() {
        return None;
    }
    let Some(month) = month_number(month) else {
        return Some(year.to_string());
    };
    match day.parse::<u32>() {
        Ok(day) => Some(format!("{year}-{month:02}-{day:02}")),
        Err(_) => Some(format!("{year}-{month:02}")),
    }
}

fn month_number(month: &str) -> Option<u32> {
    if let Ok(number) = month.parse::<u32>() {
        return (1..=12).contains(&number).then_some(number);
    }
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lowered = month.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|name| lowered.starts_with(name))
        .map(|idx| idx as u32 + 1)
}

/// Posts the search query contract as JSON to an endpoint returning
/// PublicationRecord-shaped objects.
#[derive(Clone)]
pub struct HttpSearch {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpSearch {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Result<Self, HarvestError> {
        Ok(Self {
            client: build_client(120)?,
            endpoint: endpoint.into(),
            token,
        })
    }
}

impl SearchProvider for HttpSearch {
    fn search(&self, query: &SearchQuery) -> Result<Vec<PublicationRecord>, HarvestError> {
        let mut request = self.client.post(&self.endpoint).json(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .map_err(|err| HarvestError::SearchHttp(err.to_string()))?;
        let body: Value = handle_status(response)?
            .json()
            .map_err(|err| HarvestError::SearchHttp(err.to_string()))?;
        let mut records = records_from_json(&body);
        records.truncate(query.max_results);
        Ok(records)
    }
}

/// Accepts a bare array or an object wrapping one under `results`,
/// `publications` or `records`.
pub fn records_from_json(body: &Value) -> Vec<PublicationRecord> {
    let items = match body {
        Value::Array(items) => Some(items),
        Value::Object(obj) => ["results", "publications", "records"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_array)),
        _ => None,
    };
    let Some(items) = items else {
        warn!("search response held no record list");
        return Vec::new();
    };
    items
        .iter()
        .filter(|item| {
            let is_object = item.is_object();
            if !is_object {
                warn!("ignoring non-object search result");
            }
            is_object
        })
        .map(PublicationRecord::from_json)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::domain::DateRange;

    fn query(types: &[&str]) -> SearchQuery {
        SearchQuery {
            topic: "colorectal surgery".to_string(),
            publication_types: types.iter().map(|kind| kind.to_string()).collect(),
            date_range: DateRange::last_days(7, NaiveDate::from_ymd_opt(2024, 5, 8).unwrap())
                .unwrap(),
            max_results: 10,
        }
    }

    #[test]
    fn term_with_publication_types() {
        let term = build_term(&query(&["randomized controlled trial", "systematic review"]));
        assert_eq!(
            term,
            "(colorectal surgery) AND (\"randomized controlled trial\"[pt] OR \"systematic review\"[pt])"
        );
        assert_eq!(build_term(&query(&[])), "(colorectal surgery)");
    }

    #[test]
    fn month_names_and_numbers() {
        assert_eq!(pubmed_date("2024", "Mar", "5"), Some("2024-03-05".to_string()));
        assert_eq!(pubmed_date("2024", "11", ""), Some("2024-11".to_string()));
        assert_eq!(pubmed_date("2024", "Spring", ""), Some("2024".to_string()));
        assert_eq!(pubmed_date("", "Mar", "5"), None);
    }
}
