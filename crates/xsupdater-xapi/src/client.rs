use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use xsupdater_core::{AppliedPatchSet, PatchFormat, SoftwareVersion, TaskStatus, UpdateError};

use crate::session::{HostRecord, ManagementSession, PostApplyGuidance, TaskRef};
use crate::xmlrpc::{decode_response, encode_call, open_envelope, string_list, Value, XapiReply};

const HOST_IS_SLAVE: &str = "HOST_IS_SLAVE";
const API_VERSION: &str = "1.0";
const ORIGINATOR: &str = "xs-updater";
const MASTER_SCHEME: &str = "https";

/// XenAPI session over XML-RPC.
#[derive(Debug)]
pub struct XapiSession {
    client: Client,
    base_url: String,
    session_id: String,
}

impl XapiSession {
    /// Logs in with a password. A pool slave answers `HOST_IS_SLAVE` with the
    /// master's address; the login is then retried once against the master.
    pub fn login(
        client: Client,
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<Self, UpdateError> {
        Self::login_redirecting(client, url, username, password, MASTER_SCHEME)
    }

    pub(crate) fn login_redirecting(
        client: Client,
        url: &str,
        username: &str,
        password: &str,
        master_scheme: &str,
    ) -> Result<Self, UpdateError> {
        let url = url.trim_end_matches('/');
        let reply = login_with_password(&client, url, username, password)?;
        let (base_url, reply) = match reply {
            XapiReply::Failure(description)
                if description.first().map(String::as_str) == Some(HOST_IS_SLAVE) =>
            {
                let master = master_url(&description, master_scheme).ok_or_else(|| {
                    UpdateError::Authentication(format!(
                        "{url} is a pool slave but did not name its master"
                    ))
                })?;
                warn!("{url} is a pool slave, reconnecting to master {master}");
                let reply = login_with_password(&client, &master, username, password)?;
                (master, reply)
            }
            reply => (url.to_string(), reply),
        };

        match reply {
            XapiReply::Success(value) => {
                let session_id = value
                    .as_str()
                    .ok_or_else(|| {
                        UpdateError::Authentication(
                            "login returned no session reference".to_string(),
                        )
                    })?
                    .to_string();
                debug!("logged in to {base_url}");
                Ok(Self {
                    client,
                    base_url,
                    session_id,
                })
            }
            XapiReply::Failure(description) => {
                Err(UpdateError::Authentication(description.join(", ")))
            }
        }
    }

    fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, UpdateError> {
        let mut all = Vec::with_capacity(params.len() + 1);
        all.push(Value::string(&self.session_id));
        all.extend(params);

        match rpc(&self.client, &self.base_url, method, &all)
            .map_err(|reason| UpdateError::session(method, vec![reason]))?
        {
            XapiReply::Success(value) => Ok(value),
            XapiReply::Failure(description) => Err(UpdateError::session(method, description)),
        }
    }

    fn call_str(&self, method: &str, params: Vec<Value>) -> Result<String, UpdateError> {
        let value = self.call(method, params)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                UpdateError::session(method, vec!["expected a string result".to_string()])
            })
    }
}

impl ManagementSession for XapiSession {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn this_host(&self) -> Result<HostRecord, UpdateError> {
        let session = self.call("session.get_record", vec![Value::string(&self.session_id)])?;
        let host_ref = session.member_str("this_host");
        if host_ref.is_empty() {
            return Err(UpdateError::session(
                "session.get_record",
                vec!["session record has no this_host".to_string()],
            ));
        }
        let host = self.call("host.get_record", vec![Value::string(host_ref)])?;
        Ok(host_record_from(&host))
    }

    fn applied_patches(&self, format: PatchFormat) -> Result<AppliedPatchSet, UpdateError> {
        let method = format!("{}.get_all_records", format.registry_class());
        let records = self.call(&method, Vec::new())?;
        Ok(applied_uuids_from(&records))
    }

    fn create_task(&self, label: &str) -> Result<TaskRef, UpdateError> {
        self.call_str("task.create", vec![Value::string(label), Value::string("")])
            .map(TaskRef::new)
    }

    fn task_status(&self, task: &TaskRef) -> Result<TaskStatus, UpdateError> {
        let raw = self.call_str("task.get_status", vec![Value::string(task.as_str())])?;
        TaskStatus::parse(&raw).ok_or_else(|| {
            UpdateError::session("task.get_status", vec![format!("unknown task status '{raw}'")])
        })
    }

    fn task_result(&self, task: &TaskRef) -> Result<String, UpdateError> {
        let raw = self.call_str("task.get_result", vec![Value::string(task.as_str())])?;
        Ok(unwrap_task_result(&raw))
    }

    fn task_error_info(&self, task: &TaskRef) -> Result<Vec<String>, UpdateError> {
        let info = self.call("task.get_error_info", vec![Value::string(task.as_str())])?;
        Ok(string_list(Some(&info)))
    }

    fn cancel_task(&self, task: &TaskRef) -> Result<(), UpdateError> {
        self.call("task.cancel", vec![Value::string(task.as_str())])
            .map(|_| ())
    }

    fn destroy_task(&self, task: &TaskRef) -> Result<(), UpdateError> {
        self.call("task.destroy", vec![Value::string(task.as_str())])
            .map(|_| ())
    }

    fn apply_patch(&self, format: PatchFormat, artifact: &str) -> Result<(), UpdateError> {
        let method = format!("{}.pool_apply", format.registry_class());
        self.call(&method, vec![Value::string(artifact)]).map(|_| ())
    }

    fn apply_guidance(
        &self,
        _format: PatchFormat,
        artifact: &str,
    ) -> Result<PostApplyGuidance, UpdateError> {
        // The pool_patch accessor answers for both generations.
        let guidance = self.call(
            "pool_patch.get_after_apply_guidance",
            vec![Value::string(artifact)],
        )?;
        Ok(PostApplyGuidance::new(string_list(Some(&guidance))))
    }

    fn logout(&self) -> Result<(), UpdateError> {
        match rpc(
            &self.client,
            &self.base_url,
            "session.logout",
            &[Value::string(&self.session_id)],
        )
        .map_err(|reason| UpdateError::session("session.logout", vec![reason]))?
        {
            XapiReply::Success(_) => Ok(()),
            XapiReply::Failure(description) => {
                Err(UpdateError::session("session.logout", description))
            }
        }
    }
}

fn login_with_password(
    client: &Client,
    url: &str,
    username: &str,
    password: &str,
) -> Result<XapiReply, UpdateError> {
    rpc(
        client,
        url,
        "session.login_with_password",
        &[
            Value::string(username),
            Value::string(password),
            Value::string(API_VERSION),
            Value::string(ORIGINATOR),
        ],
    )
    .map_err(|reason| UpdateError::Authentication(format!("{url}: {reason}")))
}

/// One XML-RPC round trip. Transport and decoding faults come back as text.
fn rpc(client: &Client, url: &str, method: &str, params: &[Value]) -> Result<XapiReply, String> {
    debug!("xmlrpc {method} -> {url}");
    let response = client
        .post(url)
        .header(CONTENT_TYPE, "text/xml")
        .body(encode_call(method, params))
        .send()
        .map_err(|err| err.to_string())?;
    if !response.status().is_success() {
        return Err(format!("unexpected HTTP status {}", response.status().as_u16()));
    }
    let body = response.text().map_err(|err| err.to_string())?;
    let value = decode_response(&body).map_err(|err| err.to_string())?;
    open_envelope(value).map_err(|err| err.to_string())
}

pub(crate) fn master_url(description: &[String], scheme: &str) -> Option<String> {
    let address = description.get(1)?.trim();
    if address.is_empty() {
        return None;
    }
    Some(format!("{scheme}://{address}"))
}

pub(crate) fn host_record_from(host: &Value) -> HostRecord {
    let software = host.member("software_version");
    let field = |name: &str| {
        software
            .map(|value| value.member_str(name))
            .unwrap_or_default()
            .to_string()
    };
    HostRecord {
        hostname: host.member_str("hostname").to_string(),
        software_version: SoftwareVersion {
            product_brand: field("product_brand"),
            product_version: field("product_version"),
            build_number: field("build_number"),
        },
    }
}

pub(crate) fn applied_uuids_from(records: &Value) -> AppliedPatchSet {
    records
        .as_struct()
        .map(|by_ref| {
            by_ref
                .values()
                .map(|record| record.member_str("uuid"))
                .filter(|uuid| !uuid.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Task results arrive either bare or wrapped as `<value>…</value>`.
pub(crate) fn unwrap_task_result(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("<value>")
        .and_then(|rest| rest.strip_suffix("</value>"))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}
