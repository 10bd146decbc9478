use secrecy::SecretString;

/// Secrets read at startup. Never logged; `SecretString` redacts on `Debug`.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub signing_key: SecretString,
    pub master_username: String,
    pub master_password: SecretString,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(master_username: String) -> Self {
        Self {
            signing_key: SecretString::default(),
            master_username,
            master_password: SecretString::default(),
        }
    }

    pub fn set_signing_key(&mut self, key: SecretString) {
        self.signing_key = key;
    }

    pub fn set_master_password(&mut self, password: SecretString) {
        self.master_password = password;
    }
}
