//! Boot script handed to new instances as cloud-init user data

/// Written last by the boot script; its presence means install finished
pub const INSTALL_MARKER: &str = "/tmp/v2ray-installed";

pub const INSTALL_LOG: &str = "/tmp/install-log";

/// Shell check that prints `ready` once the marker exists
pub fn marker_check() -> String {
    format!("test -f {} && echo ready", INSTALL_MARKER)
}

/// Install script: packages, firewall, proxy runtime, health endpoint, SSH
/// hardening, fail2ban and unattended upgrades. The marker is the final step.
pub fn install_script(proxy_ports: (u16, u16)) -> String {
    let (low, high) = proxy_ports;
    format!(
        r#"#!/bin/bash
set -e
exec > >(tee -a {log}) 2>&1

export DEBIAN_FRONTEND=noninteractive
apt-get update -y
apt-get upgrade -y
apt-get install -y curl wget unzip nginx certbot python3-certbot-nginx ufw fail2ban unattended-upgrades

ufw --force reset
ufw default deny incoming
ufw default allow outgoing
ufw allow 22/tcp
ufw allow 80/tcp
ufw allow 443/tcp
ufw allow {low}:{high}/tcp
ufw --force enable

bash <(curl -fsSL https://raw.githubusercontent.com/v2fly/fhs-install-v2ray/master/install-release.sh)

mkdir -p /usr/local/etc/v2ray
cat > /usr/local/etc/v2ray/config.json <<'EOF'
{{
  "log": {{ "loglevel": "warning" }},
  "inbounds": [{{
    "port": {high},
    "protocol": "vless",
    "settings": {{ "clients": [], "decryption": "none", "fallbacks": [{{ "dest": 80 }}] }},
    "streamSettings": {{ "network": "tcp" }}
  }}],
  "outbounds": [{{ "protocol": "freedom" }}]
}}
EOF

cat > /etc/nginx/sites-available/default <<'EOF'
server {{
    listen 80 default_server;
    location /health {{
        return 200 'ok';
        add_header Content-Type text/plain;
    }}
}}
EOF

sed -i 's/^#\?PermitRootLogin.*/PermitRootLogin prohibit-password/' /etc/ssh/sshd_config
sed -i 's/^#\?PasswordAuthentication.*/PasswordAuthentication no/' /etc/ssh/sshd_config
sed -i 's/^#\?PubkeyAuthentication.*/PubkeyAuthentication yes/' /etc/ssh/sshd_config

systemctl enable --now fail2ban
dpkg-reconfigure -f noninteractive unattended-upgrades

systemctl enable v2ray
systemctl restart v2ray nginx ssh

touch {marker}
"#,
        log = INSTALL_LOG,
        low = low,
        high = high,
        marker = INSTALL_MARKER,
    )
}
