// Built-in English profanity dictionary.
//
// Entries are lowercase single tokens. Hosts extend it through
// VIGIL_WORDLIST_PATH or `TextModerator::extend` rather than editing this list.

pub const DEFAULT_WORDS: &[&str] = &[
    "2g1c",
    "anal",
    "anus",
    "arse",
    "arsehole",
    "ass",
    "asshole",
    "assholes",
    "bastard",
    "bastards",
    "bitch",
    "bitches",
    "bitching",
    "blowjob",
    "blowjobs",
    "bollocks",
    "boner",
    "boob",
    "boobs",
    "bullshit",
    "butthole",
    "clit",
    "cock",
    "cocks",
    "cocksucker",
    "cum",
    "cumshot",
    "cunt",
    "cunts",
    "dick",
    "dickhead",
    "dildo",
    "dildos",
    "douche",
    "douchebag",
    "fag",
    "faggot",
    "fap",
    "felching",
    "fellatio",
    "fuck",
    "fucked",
    "fucker",
    "fuckers",
    "fuckin",
    "fucking",
    "fucks",
    "goddamn",
    "handjob",
    "hentai",
    "horny",
    "jackass",
    "jizz",
    "motherfucker",
    "motherfucking",
    "nigga",
    "nigger",
    "nsfw",
    "orgasm",
    "orgy",
    "penis",
    "piss",
    "pissed",
    "porn",
    "porno",
    "pornography",
    "prick",
    "pussy",
    "rape",
    "rapist",
    "retard",
    "scrotum",
    "semen",
    "shit",
    "shits",
    "shitty",
    "slut",
    "sluts",
    "spunk",
    "tits",
    "titties",
    "twat",
    "vagina",
    "wank",
    "wanker",
    "whore",
    "whores",
];
