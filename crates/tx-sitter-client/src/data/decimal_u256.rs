use ethers::types::U256;

pub fn serialize<S>(u256: &U256, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let s = u256.to_string();
    serializer.serialize_str(&s)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: &str = serde::Deserialize::deserialize(deserializer)?;
    let u256 = U256::from_dec_str(s).map_err(serde::de::Error::custom)?;
    Ok(u256)
}
