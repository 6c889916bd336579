//! INI configuration loading: section `[dht]`.

use ini::Ini;

use crate::error::ChordError;

#[derive(Clone, Debug)]
pub struct Params {
    pub bootstrapper: Option<String>,
    pub p2p_address: String,
    pub api_address: String,
    pub log_file: String,
    pub data_file: String,
    pub ca_cert: String,
    pub hostcert: String,
    pub hostkey: String,
}

impl Params {
    pub fn load(path: &str) -> Result<Params, ChordError> {
        let conf = Ini::load_from_file(path)?;
        let section = conf
            .section(Some("dht"))
            .ok_or_else(|| ChordError::Configured("missing [dht] section".to_string()))?;

        let required = |key: &str| -> Result<String, ChordError> {
            section
                .get(key)
                .map(|v| v.to_string())
                .ok_or_else(|| ChordError::Configured(format!("missing required key '{}'", key)))
        };

        let bootstrapper = section
            .get("bootstrapper")
            .map(|v| v.to_string())
            .filter(|v| !v.is_empty());

        Ok(Params {
            bootstrapper,
            p2p_address: required("p2p_address")?,
            api_address: required("api_address")?,
            log_file: required("log_file")?,
            data_file: required("data_file")?,
            ca_cert: required("ca_cert")?,
            hostcert: required("hostcert")?,
            hostkey: required("hostkey")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn loads_a_complete_section() {
        let path = write_temp(
            "chord_test_config_complete.ini",
            "[dht]\n\
             bootstrapper =\n\
             p2p_address = 127.0.0.1:7402\n\
             api_address = 127.0.0.1:8402\n\
             log_file = node.log\n\
             data_file = node.json\n\
             ca_cert = ca.pem\n\
             hostcert = host.pem\n\
             hostkey = host.key\n",
        );
        let params = Params::load(&path).unwrap();
        assert!(params.bootstrapper.is_none());
        assert_eq!(params.p2p_address, "127.0.0.1:7402");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let path = write_temp("chord_test_config_incomplete.ini", "[dht]\np2p_address = x\n");
        assert!(Params::load(&path).is_err());
        let _ = std::fs::remove_file(path);
    }
}
