// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Boot configuration rendering.
//!
//! Produces the user-data a fresh instance consumes on first boot:
//!
//! - Linux: a `#cloud-config` document that installs packages, trusts the
//!   optional CA bundle, drops the runner install script and runs it.
//! - Windows: the PowerShell install script itself, without an interpreter
//!   marker line.
//!
//! The install script can be replaced per pool through [`CloudConfigSpec`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use minijinja::Environment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::params::{BootstrapInstance, OsType, RunnerApplicationDownload};

/// User the runner service runs as on Linux.
pub const DEFAULT_RUNNER_USERNAME: &str = "runner";

/// Group the runner service runs as on Linux.
pub const DEFAULT_RUNNER_GROUP: &str = "runner";

const DEFAULT_PACKAGES: &[&str] = &["curl", "tar"];

const PRE_INSTALL_DIR: &str = "/run/runner-pre-install";

/// Boot configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CloudConfigError {
    /// Rendering a template failed.
    #[error("rendering template: {0}")]
    Template(#[from] minijinja::Error),

    /// A base64 field could not be decoded.
    #[error("decoding {what}: {source}")]
    Base64 {
        /// Which field.
        what: String,
        /// Decoder error.
        #[source]
        source: base64::DecodeError,
    },

    /// A decoded field is not UTF-8.
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(String),

    /// The template customisations in the extra specs are malformed.
    #[error("parsing cloud config spec: {0}")]
    Spec(#[from] serde_json::Error),

    /// Rendering for this OS family is not supported.
    #[error("unsupported OS type: {0}")]
    UnsupportedOsType(OsType),
}

/// Result type for rendering.
pub type Result<T> = std::result::Result<T, CloudConfigError>;

/// Per-pool customisations of the boot configuration, read from extra specs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfigSpec {
    /// Base64 encoded replacement for the runner install template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_install_template: Option<String>,
    /// Base64 encoded scripts run before the install script, keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pre_install_scripts: BTreeMap<String, String>,
    /// Extra values exposed to the install template as `extra_context`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_context: BTreeMap<String, String>,
}

impl CloudConfigSpec {
    /// Extract the customisations from raw extra specs, ignoring other keys.
    pub fn from_extra_specs(extra_specs: Option<&Value>) -> Result<Self> {
        match extra_specs {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value) => Ok(serde_json::from_value(value.clone())?),
        }
    }
}

#[derive(Debug, Serialize)]
struct InstallContext<'a> {
    runner_name: &'a str,
    runner_username: &'a str,
    runner_group: &'a str,
    repo_url: &'a str,
    callback_url: &'a str,
    metadata_url: &'a str,
    callback_token: &'a str,
    runner_labels: String,
    github_runner_group: &'a str,
    download_url: &'a str,
    file_name: &'a str,
    temp_download_token: &'a str,
    sha256_checksum: &'a str,
    enable_boot_debug: bool,
    use_jit_config: bool,
    extra_context: &'a BTreeMap<String, String>,
}

/// Render the runner install script (bash on Linux, PowerShell on Windows).
pub fn install_script(
    params: &BootstrapInstance,
    tools: &RunnerApplicationDownload,
    runner_name: &str,
) -> Result<String> {
    let spec = CloudConfigSpec::from_extra_specs(params.extra_specs.as_ref())?;

    let template = match &spec.runner_install_template {
        Some(encoded) => decode_utf8("runner_install_template", encoded)?,
        None => match params.os_type {
            OsType::Linux => LINUX_INSTALL_TEMPLATE.to_string(),
            OsType::Windows => WINDOWS_INSTALL_TEMPLATE.to_string(),
            OsType::Unknown => return Err(CloudConfigError::UnsupportedOsType(params.os_type)),
        },
    };

    let ctx = InstallContext {
        runner_name,
        runner_username: DEFAULT_RUNNER_USERNAME,
        runner_group: DEFAULT_RUNNER_GROUP,
        repo_url: &params.repo_url,
        callback_url: &params.callback_url,
        metadata_url: &params.metadata_url,
        callback_token: &params.instance_token,
        runner_labels: params.labels.join(","),
        github_runner_group: &params.runner_group,
        download_url: tools.download_url.as_deref().unwrap_or_default(),
        file_name: tools.filename.as_deref().unwrap_or_default(),
        temp_download_token: tools.temp_download_token.as_deref().unwrap_or_default(),
        sha256_checksum: tools.sha256_checksum.as_deref().unwrap_or_default(),
        enable_boot_debug: params.user_data_options.enable_boot_debug,
        use_jit_config: params.jit_config_enabled,
        extra_context: &spec.extra_context,
    };

    Ok(template_env().render_str(&template, &ctx)?)
}

/// Render the complete boot configuration for `params`.
pub fn render(
    params: &BootstrapInstance,
    tools: &RunnerApplicationDownload,
    runner_name: &str,
) -> Result<String> {
    let script = install_script(params, tools, runner_name)?;
    if params.os_type == OsType::Windows {
        return Ok(script);
    }

    let spec = CloudConfigSpec::from_extra_specs(params.extra_specs.as_ref())?;

    let mut packages: Vec<String> = DEFAULT_PACKAGES.iter().map(|p| p.to_string()).collect();
    for pkg in &params.user_data_options.extra_packages {
        if !packages.contains(pkg) {
            packages.push(pkg.clone());
        }
    }

    let pre_install: Vec<(String, String)> = spec
        .pre_install_scripts
        .iter()
        .map(|(name, content)| {
            // Validate now so a broken script fails the create, not the boot.
            decode_utf8(&format!("pre_install_scripts.{name}"), content)?;
            Ok((quote(&format!("{PRE_INSTALL_DIR}/{name}")), content.clone()))
        })
        .collect::<Result<_>>()?;

    let ca_bundle = match &params.ca_cert_bundle {
        Some(encoded) if !encoded.is_empty() => {
            let pem = decode_utf8("ca-cert-bundle", encoded)?;
            Some(
                pem.lines()
                    .map(|line| format!("      {line}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        }
        _ => None,
    };

    // YAML literal, not Jinja's `True`
    let package_upgrade = if params.user_data_options.disable_updates_on_boot {
        "false"
    } else {
        "true"
    };

    let ctx = minijinja::context! {
        hostname => quote(runner_name),
        package_upgrade => package_upgrade,
        packages => packages.iter().map(|p| quote(p)).collect::<Vec<_>>(),
        ssh_keys => params.ssh_keys.iter().map(|k| quote(k)).collect::<Vec<_>>(),
        runner_username => DEFAULT_RUNNER_USERNAME,
        ca_bundle => ca_bundle,
        install_script => BASE64.encode(script.as_bytes()),
        pre_install => pre_install,
    };

    Ok(template_env().render_str(CLOUD_CONFIG_TEMPLATE, ctx)?)
}

fn template_env() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_keep_trailing_newline(true);
    env
}

fn decode_utf8(what: &str, encoded: &str) -> Result<String> {
    let raw = BASE64
        .decode(encoded.trim())
        .map_err(|source| CloudConfigError::Base64 {
            what: what.to_string(),
            source,
        })?;
    String::from_utf8(raw).map_err(|_| CloudConfigError::InvalidUtf8(what.to_string()))
}

/// JSON string literals are valid YAML scalars.
fn quote(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

const CLOUD_CONFIG_TEMPLATE: &str = r#"#cloud-config
preserve_hostname: false
hostname: {{ hostname }}
package_upgrade: {{ package_upgrade }}
packages:
{% for pkg in packages %}
  - {{ pkg }}
{% endfor %}
users:
  - name: {{ runner_username }}
    shell: /bin/bash
    sudo: "ALL=(ALL) NOPASSWD:ALL"
    lock_passwd: true
{% if ssh_keys %}
    ssh_authorized_keys:
{% for key in ssh_keys %}
      - {{ key }}
{% endfor %}
{% endif %}
{% if ca_bundle %}
ca_certs:
  trusted:
    - |
{{ ca_bundle }}
{% endif %}
write_files:
  - encoding: b64
    content: {{ install_script }}
    owner: root:root
    path: /install_runner.sh
    permissions: "0755"
{% for item in pre_install %}
  - encoding: b64
    content: {{ item[1] }}
    owner: root:root
    path: {{ item[0] }}
    permissions: "0755"
{% endfor %}
runcmd:
{% for item in pre_install %}
  - [{{ item[0] }}]
{% endfor %}
  - su -l -c /install_runner.sh {{ runner_username }}
  - rm -f /install_runner.sh
"#;

const LINUX_INSTALL_TEMPLATE: &str = r#"#!/bin/bash

set -e
set -o pipefail
{% if enable_boot_debug %}
set -x
{% endif %}

CALLBACK_URL="{{ callback_url }}"
METADATA_URL="{{ metadata_url }}"
BEARER_TOKEN="{{ callback_token }}"
RUNNER_HOME="/home/{{ runner_username }}/actions-runner"

if [ -z "$METADATA_URL" ]; then
	echo "METADATA_URL is not set"
	exit 1
fi

function call() {
	PAYLOAD="$1"
	[[ $CALLBACK_URL =~ ^(.*)/status(/)?$ ]] || CALLBACK_URL="${CALLBACK_URL}/status"
	curl --retry 5 --retry-delay 5 --retry-connrefused --fail -s -X POST -d "${PAYLOAD}" \
		-H 'Accept: application/json' -H "Authorization: Bearer ${BEARER_TOKEN}" "${CALLBACK_URL}" \
		|| echo "failed to call home: exit code ($?)"
}

function sendStatus() {
	call "{\"status\": \"installing\", \"message\": \"$1\"}"
}

function success() {
	call "{\"status\": \"idle\", \"message\": \"$1\", \"agent_id\": ${2:-null}}"
}

function fail() {
	call "{\"status\": \"failed\", \"message\": \"$1\"}"
	exit 1
}

function getMetadata() {
	curl --retry 5 --retry-delay 5 --retry-connrefused --fail -s \
		-H 'Accept: application/json' -H "Authorization: Bearer ${BEARER_TOKEN}" \
		"${METADATA_URL}/$1" -o "$2"
}

sendStatus "downloading tools from {{ download_url }}"
TEMP_TOKEN=""
{% if temp_download_token %}
TEMP_TOKEN="Authorization: Bearer {{ temp_download_token }}"
{% endif %}
curl --retry 5 --retry-delay 5 --retry-connrefused --fail -L -H "${TEMP_TOKEN}" \
	-o "/home/{{ runner_username }}/{{ file_name }}" "{{ download_url }}" || fail "failed to download tools"
{% if sha256_checksum %}
echo "{{ sha256_checksum }}  /home/{{ runner_username }}/{{ file_name }}" | sha256sum -c - || fail "checksum mismatch for tools"
{% endif %}

mkdir -p "$RUNNER_HOME" || fail "failed to create runner folder"
sendStatus "extracting runner"
tar xf "/home/{{ runner_username }}/{{ file_name }}" -C "$RUNNER_HOME" || fail "failed to extract runner"
cd "$RUNNER_HOME"

sendStatus "installing dependencies"
sudo ./bin/installdependencies.sh || fail "failed to install dependencies"

sendStatus "configuring runner"
{% if use_jit_config %}
getMetadata "credentials/runner" "$RUNNER_HOME/.runner" || fail "failed to get runner file"
getMetadata "credentials/credentials" "$RUNNER_HOME/.credentials" || fail "failed to get credentials file"
getMetadata "credentials/credentials_rsaparams" "$RUNNER_HOME/.credentials_rsaparams" || fail "failed to get credentials_rsaparams file"
{% else %}
REGISTRATION_TOKEN=$(curl --retry 5 --retry-delay 5 --retry-connrefused --fail -s \
	-H 'Accept: application/json' -H "Authorization: Bearer ${BEARER_TOKEN}" \
	"${METADATA_URL}/runner-registration-token/") || fail "failed to get registration token"
./config.sh --unattended --url "{{ repo_url }}" --token "$REGISTRATION_TOKEN" \
{% if github_runner_group %}
	--runnergroup "{{ github_runner_group }}" \
{% endif %}
	--name "{{ runner_name }}" --labels "{{ runner_labels }}" --ephemeral || fail "failed to configure runner"
{% endif %}

sendStatus "installing runner service"
sudo ./svc.sh install {{ runner_username }} || fail "failed to install service"
sudo chown {{ runner_username }}:{{ runner_group }} -R "/home/{{ runner_username }}" || fail "failed to change owner"

sendStatus "starting service"
sudo ./svc.sh start || fail "failed to start service"

AGENT_ID=""
if [ -f "$RUNNER_HOME/.runner" ]; then
	AGENT_ID=$(grep -o '"agentId": *[0-9]*' "$RUNNER_HOME/.runner" | grep -o '[0-9]*' || true)
fi
success "runner successfully installed" "${AGENT_ID:-null}"
"#;

const WINDOWS_INSTALL_TEMPLATE: &str = r#"Param(
	[Parameter(Mandatory=$false)]
	[string]$Token="{{ callback_token }}"
)

$ErrorActionPreference="Stop"
{% if enable_boot_debug %}
Set-PSDebug -Trace 1
{% endif %}

$CallbackURL = "{{ callback_url }}"
$MetadataURL = "{{ metadata_url }}"
if (-not $CallbackURL.EndsWith("/status")) { $CallbackURL = "$CallbackURL/status" }

function Invoke-Call {
	Param([Parameter(Mandatory=$true)][hashtable]$Payload)
	$headers = @{ "Authorization" = "Bearer $Token"; "Accept" = "application/json" }
	try {
		Invoke-RestMethod -Method Post -Uri $CallbackURL -Headers $headers -Body ($Payload | ConvertTo-Json) -ContentType "application/json"
	} catch {
		Write-Output "failed to call home: $_"
	}
}

function Update-Status { Param([string]$Message) Invoke-Call @{ status = "installing"; message = $Message } }
function Invoke-Fail { Param([string]$Message) Invoke-Call @{ status = "failed"; message = $Message }; exit 1 }

try {
	$runnerDir = "C:\actions-runner"
	New-Item -ItemType Directory -Force -Path $runnerDir | Out-Null
	$archive = Join-Path $env:TMP "{{ file_name }}"

	Update-Status "downloading tools from {{ download_url }}"
	$downloadHeaders = @{}
{% if temp_download_token %}
	$downloadHeaders["Authorization"] = "Bearer {{ temp_download_token }}"
{% endif %}
	Invoke-WebRequest -UseBasicParsing -Uri "{{ download_url }}" -Headers $downloadHeaders -OutFile $archive
{% if sha256_checksum %}
	if ((Get-FileHash -Algorithm SHA256 $archive).Hash -ne "{{ sha256_checksum }}".ToUpper()) { Invoke-Fail "checksum mismatch for tools" }
{% endif %}

	Update-Status "extracting runner"
	Expand-Archive -Path $archive -DestinationPath $runnerDir -Force
	Set-Location $runnerDir

	Update-Status "configuring runner"
	$authHeaders = @{ "Authorization" = "Bearer $Token"; "Accept" = "application/json" }
{% if use_jit_config %}
	Invoke-WebRequest -UseBasicParsing -Headers $authHeaders -Uri "$MetadataURL/credentials/runner" -OutFile (Join-Path $runnerDir ".runner")
	Invoke-WebRequest -UseBasicParsing -Headers $authHeaders -Uri "$MetadataURL/credentials/credentials" -OutFile (Join-Path $runnerDir ".credentials")
	Invoke-WebRequest -UseBasicParsing -Headers $authHeaders -Uri "$MetadataURL/credentials/credentials_rsaparams" -OutFile (Join-Path $runnerDir ".credentials_rsaparams")
{% else %}
	$registrationToken = Invoke-RestMethod -Headers $authHeaders -Uri "$MetadataURL/runner-registration-token/"
	$configArgs = @("--unattended", "--url", "{{ repo_url }}", "--token", $registrationToken, "--name", "{{ runner_name }}", "--labels", "{{ runner_labels }}", "--ephemeral", "--runasservice")
{% if github_runner_group %}
	$configArgs += @("--runnergroup", "{{ github_runner_group }}")
{% endif %}
	./config.cmd @configArgs
	if ($LASTEXITCODE) { Invoke-Fail "failed to configure runner" }
{% endif %}

	Invoke-Call @{ status = "idle"; message = "runner successfully installed" }
} catch {
	Invoke-Fail "failed to install runner: $_"
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{OsArch, UserDataOptions};
    use serde_json::json;

    fn params(os_type: OsType) -> BootstrapInstance {
        BootstrapInstance {
            name: "runner-1".to_string(),
            repo_url: "https://github.com/org/repo".to_string(),
            callback_url: "https://garm.example.com/api/v1/callbacks".to_string(),
            metadata_url: "https://garm.example.com/api/v1/metadata".to_string(),
            instance_token: "secret-token".to_string(),
            labels: vec!["self-hosted".to_string(), "linux".to_string()],
            os_type,
            os_arch: OsArch::Amd64,
            ..Default::default()
        }
    }

    fn tools() -> RunnerApplicationDownload {
        RunnerApplicationDownload {
            os: Some("linux".to_string()),
            architecture: Some("x64".to_string()),
            download_url: Some("https://example.com/runner.tar.gz".to_string()),
            filename: Some("runner.tar.gz".to_string()),
            ..Default::default()
        }
    }

    fn embedded_script(rendered: &str) -> String {
        let line = rendered
            .lines()
            .find(|l| l.trim_start().starts_with("content:"))
            .unwrap();
        let encoded = line.trim_start().trim_start_matches("content:").trim();
        String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap()
    }

    #[test]
    fn test_linux_render_is_cloud_config() {
        let rendered = render(&params(OsType::Linux), &tools(), "runner-1").unwrap();
        assert!(rendered.starts_with("#cloud-config\n"));
        assert!(rendered.contains("package_upgrade: true"));
        assert!(!rendered.contains("True"));
        assert!(rendered.ends_with("rm -f /install_runner.sh\n"));
        assert!(rendered.contains("hostname: \"runner-1\""));
        assert!(rendered.contains("- \"curl\""));

        let script = embedded_script(&rendered);
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("https://example.com/runner.tar.gz"));
        assert!(script.contains("--labels \"self-hosted,linux\""));
        assert!(!script.contains("set -x"));
    }

    #[test]
    fn test_user_data_options_are_honoured() {
        let mut p = params(OsType::Linux);
        p.user_data_options = UserDataOptions {
            disable_updates_on_boot: true,
            extra_packages: vec!["jq".to_string(), "curl".to_string()],
            enable_boot_debug: true,
        };
        let rendered = render(&p, &tools(), "runner-1").unwrap();
        assert!(rendered.contains("package_upgrade: false"));
        assert!(rendered.contains("- \"jq\""));
        assert_eq!(rendered.matches("- \"curl\"").count(), 1);
        assert!(embedded_script(&rendered).contains("set -x"));
    }

    #[test]
    fn test_jit_config_skips_registration_token() {
        let mut p = params(OsType::Linux);
        p.jit_config_enabled = true;
        let script = install_script(&p, &tools(), "runner-1").unwrap();
        assert!(script.contains("credentials/runner"));
        assert!(!script.contains("runner-registration-token"));
    }

    #[test]
    fn test_windows_render_is_powershell() {
        let rendered = render(&params(OsType::Windows), &tools(), "runner-1").unwrap();
        assert!(rendered.starts_with("Param("));
        assert!(!rendered.contains("#cloud-config"));
        assert!(rendered.contains("config.cmd"));
    }

    #[test]
    fn test_install_template_override_and_extra_context() {
        let mut p = params(OsType::Linux);
        let template = "#!/bin/sh\necho {{ runner_name }} {{ extra_context.greeting }}\n";
        p.extra_specs = Some(json!({
            "runner_install_template": BASE64.encode(template),
            "extra_context": {"greeting": "hello"}
        }));
        let script = install_script(&p, &tools(), "runner-1").unwrap();
        assert_eq!(script, "#!/bin/sh\necho runner-1 hello\n");
    }

    #[test]
    fn test_pre_install_scripts_run_before_install() {
        let mut p = params(OsType::Linux);
        p.extra_specs = Some(json!({
            "pre_install_scripts": {"01-setup": BASE64.encode("#!/bin/sh\ntrue\n")}
        }));
        let rendered = render(&p, &tools(), "runner-1").unwrap();
        let pre = rendered.find("- [\"/run/runner-pre-install/01-setup\"]").unwrap();
        let install = rendered.find("su -l -c /install_runner.sh").unwrap();
        assert!(pre < install);
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let mut p = params(OsType::Linux);
        p.extra_specs = Some(json!({"runner_install_template": "***"}));
        let err = install_script(&p, &tools(), "runner-1").unwrap_err();
        assert!(err.to_string().contains("runner_install_template"));
    }

    #[test]
    fn test_ca_bundle_is_trusted() {
        let mut p = params(OsType::Linux);
        p.ca_cert_bundle = Some(BASE64.encode("-----BEGIN CERTIFICATE-----\nabc\n-----END CERTIFICATE-----\n"));
        let rendered = render(&p, &tools(), "runner-1").unwrap();
        assert!(rendered.contains("ca_certs:"));
        assert!(rendered.contains("      -----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn test_unknown_os_type_fails() {
        let err = render(&params(OsType::Unknown), &tools(), "runner-1").unwrap_err();
        assert!(matches!(err, CloudConfigError::UnsupportedOsType(OsType::Unknown)));
    }
}
