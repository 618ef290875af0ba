use rand::Rng;

/// Password alphabet. No quotes or backslashes, so passwords survive SQL
/// literals and shell strings unescaped.
const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                        abcdefghijklmnopqrstuvwxyz\
                        0123456789)(*&^%$#@!~";

/// Generate a random password with given length
pub fn gen_password(length: u8) -> String {
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Postgres MD5 password form: `md5` + md5(password + username)
pub fn md5_password(username: &str, password: &str) -> String {
    format!("md5{:x}", md5::compute(format!("{}{}", password, username)))
}

/// `gen-pass` command
pub fn gen_pass(length: u8, username: Option<String>, password: Option<String>) {
    let password = password.unwrap_or_else(|| gen_password(length));

    println!("Generated password: {}", password);

    match username {
        Some(username) => println!(
            "Generated MD5 (user: {}): {}",
            username,
            md5_password(&username, &password)
        ),
        None => println!("Hint: Please provide --username to generate MD5"),
    }
}
