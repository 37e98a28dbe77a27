//! Application constants and configuration values.
//!
//! This module centralizes the fixed hosts, provider paths and request
//! parameters the consumer app sends, so the request builders stay readable.

/// Relay (encryption / captcha) service
pub mod relay {
    /// Relay base URL, endpoints are appended to it
    pub const HOST: &str = "https://api.120399.xyz/wsgw";

    /// Encrypts a logical provider request
    pub const ENCRYPT_PATH: &str = "/encrypt";

    /// Decrypts a raw provider response
    pub const DECRYPT_PATH: &str = "/decrypt";

    /// Slider captcha recognition
    pub const RECOGNIZE_PATH: &str = "/get_x";

    /// Key every relay request body is wrapped under
    pub const ENVELOPE_KEY: &str = "yuheng";
}

/// Provider (consumer API) constants
pub mod provider {
    /// Provider base URL that relay-relative URLs resolve against
    pub const BASE_URL: &str = "https://www.95598.cn";

    /// Prefix applied to every path in [`paths`]
    pub const API_PREFIX: &str = "/api";

    /// Provider path table
    pub mod paths {
        pub const KEY_CODE: &str = "/oauth2/outer/c02/f02";
        pub const AUTHORIZE: &str = "/oauth2/oauth/authorize";
        pub const WEB_TOKEN: &str = "/oauth2/outer/getWebToken";
        pub const SEARCH_USER: &str = "/osg-open-uc0001/member/c9/f02";
        pub const LOGIN_VERIFY_CODE: &str = "/osg-web0004/open/c44/f05";
        pub const LOGIN_TEST_CODE: &str = "/osg-web0004/open/c44/f06";
        pub const ACCOUNT_BALANCE: &str = "/osg-open-bc0001/member/c05/f01";
        pub const BUSINESS_INFO: &str = "/osg-web0004/member/c24/f01";
    }

    /// Success code in a decrypted payload (string compared)
    pub const SUCCESS_CODE: &str = "1";

    /// Message sent with 10002 when the web channel key code has expired
    pub const KEY_CODE_EXPIRED_MESSAGE: &str = "WEB渠道KeyCode已失效";

    /// Message sent with 10002 when the token header was empty
    pub const TOKEN_EMPTY_MESSAGE: &str = "Token 为空！";

    /// Marker the login endpoint uses for a wrongly solved slider
    pub const VERIFICATION_ERROR_MARKER: &str = "验证错误";

    /// Prefix for authorize-path errors that require a fresh authorization
    pub const REOBTAIN_PREFIX: &str = "重新获取";

    /// Pattern of provider messages that mean the cached session is unusable
    pub const SESSION_INVALIDATION_PATTERN: &str = "无效|失效|过期|重新获取|请求异常";
}

/// Fixed request parameters the consumer app sends
pub mod request {
    pub const SOURCE: &str = "SGAPP";
    pub const TARGET: &str = "SGAPP";
    pub const SERVICE_CODE: &str = "0101183";
    pub const USER_INFORM_SERVICE_CODE: &str = "0101143";
    pub const MEMBER: &str = "0902";
    pub const TENANT: &str = "state_grid";
    pub const CHANNEL_CODE: &str = "0902";
    pub const ACCOUNT_FUNC_CODE: &str = "WEBA10071300";
    pub const USAGE_FUNC_CODE: &str = "WEBALIPAY_01";
    pub const USAGE_SERVICE_CODE: &str = "BCP_000026";
    pub const USAGE_SOURCE: &str = "app";
    pub const CLEAR_CACHE: &str = "11";
    pub const PROMOT_CODE: &str = "1";
    pub const PROMOT_TYPE: &str = "1";
    pub const CHANNELS: &str = "web";

    /// `params4` selector for the daily usage series
    pub const DAILY_SERIES: &str = "010103";

    /// `params4` selector for the monthly usage series
    pub const MONTHLY_SERIES: &str = "010102";

    /// Captcha canvas the challenge is rendered for
    pub const CANVAS_HEIGHT: u32 = 200;
    pub const CANVAS_WIDTH: u32 = 310;

    /// Device profile submitted with the login
    pub const OPT_SYS: &str = "android";
    pub const PUSH_ID: &str = "000000";
    pub const ADDRESS_PROVINCE: &str = "110100";
    pub const ADDRESS_REGION: &str = "110101";
    pub const ADDRESS_CITY: &str = "330100";
}

/// Local storage constants
pub mod storage {
    /// Data dir for the archive and file credential backend
    pub const DEFAULT_DATA_DIR: &str = "./data";
}

/// Credential store constants
pub mod credentials {
    /// Namespace directory / key prefix for stored credentials
    pub const NAMESPACE: &str = "ONZ3V";

    /// Serialized session blob
    pub const SESSION_KEY: &str = "95598_bizrt";

    /// Epoch millis at which the session was saved
    pub const SESSION_TIME_KEY: &str = "95598_token_time";
}

/// Usage query constants
pub mod usage {
    /// Daily window length when nothing is configured
    pub const DEFAULT_QUERY_DAYS: u32 = 7;

    /// Daily value meaning "no reading"
    pub const NO_READING: &str = "-";

    /// A full monthly series
    pub const MONTHS_PER_YEAR: usize = 12;

    /// Default daily sample retention in the archive
    pub const DEFAULT_RETENTION_DAYS: u32 = 365;

    /// Default cached session lifetime in hours
    pub const DEFAULT_CACHE_HOURS: f64 = 24.0;

    /// Archive file name inside the data dir
    pub const HISTORY_FILE: &str = "history_data.json";
}

/// MQTT constants
pub mod mqtt {
    pub const DEFAULT_PORT: u16 = 1883;
    pub const DEFAULT_TOPIC_PREFIX: &str = "nodejs/state-grid";
    pub const CLIENT_ID_PREFIX: &str = "mqtt_state_grid_";

    /// Connect + publish must complete within this many milliseconds
    pub const CONNECT_TIMEOUT_MS: u64 = 2000;

    /// Linger after publish before disconnecting
    pub const DRAIN_INTERVAL_MS: u64 = 2000;

    pub const KEEP_ALIVE_SECS: u64 = 30;
    pub const CHANNEL_CAPACITY: usize = 10;
}

/// Transport constants
pub mod transport {
    /// Default request timeout in seconds
    pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

    /// Default response body encoding
    pub const DEFAULT_ENCODING: &str = "utf-8";
}
